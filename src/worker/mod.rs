//! Queues, worker pools, and the per-run registry wiring them together.

pub mod pool;
pub mod queue;
pub mod registry;

pub use pool::WorkerPool;
pub use queue::WorkQueue;
pub use registry::{ScorerRouter, WorkerRegistry};

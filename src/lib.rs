//! evalforge: batch prompt evaluation pipeline.
//!
//! Runs large batches of prompts against many models and judges the
//! outputs with pluggable scorers. The pipeline has two concurrent stages,
//! generation (one worker pool per model) feeding scoring (one worker
//! pool per scorer), backed by idempotent on-disk checkpoints, so a
//! crashed or restarted run never recomputes finished work.

pub mod checkpoint;
pub mod consensus;
pub mod error;
pub mod generate;
pub mod llm;
pub mod pipeline;
pub mod schema;
pub mod scorer;
pub mod stats;
pub mod worker;

// Re-export commonly used error types
pub use checkpoint::CheckpointError;
pub use consensus::VoteError;
pub use error::CompletionError;
pub use pipeline::{ConfigError, LoadError, PipelineError};
pub use scorer::ScorerError;

//! Fixed-size pools of worker tasks.
//!
//! Workers are plain spawned tasks looping on a shared queue. Shutdown is
//! abort-based: every handle is aborted and then awaited, so a worker mid
//! backoff-sleep or mid network call is abandoned at its await point rather
//! than allowed to finish the wait.

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::{error, info};

/// A named group of worker tasks sharing one queue.
pub struct WorkerPool {
    name: String,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `parallelism` workers. The factory is called once per worker
    /// with its index and must return that worker's run-loop future.
    pub fn spawn<F, Fut>(name: impl Into<String>, parallelism: usize, factory: F) -> Self
    where
        F: Fn(usize) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let handles = (0..parallelism)
            .map(|index| tokio::spawn(factory(index)))
            .collect();
        info!(pool = %name, workers = parallelism, "Worker pool started");
        Self { name, handles }
    }

    /// Number of workers in this pool.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the pool has no workers.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Aborts every worker and awaits termination.
    pub async fn shutdown(self) {
        for handle in &self.handles {
            handle.abort();
        }
        for handle in self.handles {
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!(pool = %self.name, error = %e, "Worker task panicked"),
            }
        }
        info!(pool = %self.name, "Worker pool stopped");
    }
}

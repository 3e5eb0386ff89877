//! Queue and pool registry for one run.
//!
//! One generation queue per model, one scoring queue per scorer, and the
//! routing between them: a loaded sample is replicated into every model's
//! queue, and a generated sample goes to exactly one scoring queue: the
//! one named by its evaluation recipe. All queues share a single drain
//! signal, so "is anything still in flight" is one scan plus a wakeup.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{info, warn};

use crate::schema::{Sample, SampleWithOutputs};

use super::pool::WorkerPool;
use super::queue::WorkQueue;

/// Routes generated samples to the scoring queue their sample names.
///
/// Generation workers hold one of these instead of the whole registry, so
/// the generation stage cannot touch scorer pools or other models' queues.
#[derive(Clone)]
pub struct ScorerRouter {
    queues: Arc<HashMap<String, WorkQueue<SampleWithOutputs>>>,
}

impl ScorerRouter {
    /// Submits one generated sample to its scorer's queue.
    pub fn submit(&self, sample_with_outputs: SampleWithOutputs) {
        let scorer = sample_with_outputs.sample.evaluation.scorer.clone();
        match self.queues.get(&scorer) {
            Some(queue) => queue.push(sample_with_outputs),
            None => {
                // Samples are filtered to configured scorers before
                // submission, so this indicates a wiring bug.
                warn!(scorer = %scorer, "No scoring queue for scorer, dropping sample");
            }
        }
    }
}

/// Owns every queue and pool of one run.
pub struct WorkerRegistry {
    generator_queues: HashMap<String, WorkQueue<Sample>>,
    scorer_queues: Arc<HashMap<String, WorkQueue<SampleWithOutputs>>>,
    pools: Vec<WorkerPool>,
    drain: Arc<Notify>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            generator_queues: HashMap::new(),
            scorer_queues: Arc::new(HashMap::new()),
            pools: Vec::new(),
            drain: Arc::new(Notify::new()),
        }
    }

    /// The drain signal shared by every queue in this registry.
    pub fn drain_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.drain)
    }

    /// Creates the scoring queues, one per scorer name. Must run before
    /// [`WorkerRegistry::router`] hands out routes.
    pub fn create_scorer_queues<I: IntoIterator<Item = String>>(&mut self, names: I) {
        let queues: HashMap<String, WorkQueue<SampleWithOutputs>> = names
            .into_iter()
            .map(|name| {
                let queue = WorkQueue::new(format!("scorer:{}", name), Arc::clone(&self.drain));
                (name, queue)
            })
            .collect();
        self.scorer_queues = Arc::new(queues);
    }

    /// Returns the queue for one scorer, if configured.
    pub fn scorer_queue(&self, name: &str) -> Option<WorkQueue<SampleWithOutputs>> {
        self.scorer_queues.get(name).cloned()
    }

    /// Creates the generation queue for one model.
    pub fn create_generator_queue(&mut self, model: &str) -> WorkQueue<Sample> {
        let queue = WorkQueue::new(format!("generate:{}", model), Arc::clone(&self.drain));
        self.generator_queues.insert(model.to_string(), queue.clone());
        queue
    }

    /// A router over the scoring queues for generation workers to hold.
    pub fn router(&self) -> ScorerRouter {
        ScorerRouter {
            queues: Arc::clone(&self.scorer_queues),
        }
    }

    /// Registers a running pool for shutdown bookkeeping.
    pub fn add_pool(&mut self, pool: WorkerPool) {
        self.pools.push(pool);
    }

    /// Replicates one sample into every model's generation queue.
    pub fn submit_sample(&self, sample: &Sample) {
        for queue in self.generator_queues.values() {
            queue.push(sample.clone());
        }
    }

    /// Whether no queue has unfinished work.
    pub fn all_idle(&self) -> bool {
        self.generator_queues
            .values()
            .all(|q| q.unfinished() == 0)
            && self.scorer_queues.values().all(|q| q.unfinished() == 0)
    }

    /// Total unfinished items across every queue.
    pub fn unfinished(&self) -> usize {
        self.generator_queues
            .values()
            .map(|q| q.unfinished())
            .chain(self.scorer_queues.values().map(|q| q.unfinished()))
            .sum()
    }

    /// Waits until every queue is idle.
    ///
    /// The drain future is armed before the idle check, so a wakeup firing
    /// between the check and the await is never lost.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.drain.notified();
            if self.all_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Aborts every worker and awaits termination.
    pub async fn shutdown(self) {
        info!(pools = self.pools.len(), "Stopping worker pools");
        for pool in self.pools {
            pool.shutdown().await;
        }
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

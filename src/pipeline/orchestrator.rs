//! Pipeline orchestrator: builds the stages, runs one batch to completion.
//!
//! The run moves through four states. `Configuring` checks every sample
//! against its scorer's contract and refuses to start on any violation,
//! so no network call happens against a batch that is partially invalid.
//! `Running` spawns the pools and floods the generation queues. `Draining`
//! waits on the registry's drain signal until no queue has in-flight work.
//! `Stopped` aborts every worker and awaits termination; abandoned network
//! calls and backoff sleeps die at their await points.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::generate::{run_generator, GenerationContext};
use crate::llm::CompletionBackend;
use crate::schema::Sample;
use crate::scorer::{build_scorer, run_scorer, Scorer, ScoringContext};
use crate::stats::{RunStats, StatsSnapshot};
use crate::worker::{WorkerPool, WorkerRegistry};

use super::config::{Config, ConfigError};

/// Interval between progress log lines while draining.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

/// Lifecycle state of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Configuring,
    Running,
    Draining,
    Stopped,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Configuring => write!(f, "configuring"),
            RunState::Running => write!(f, "running"),
            RunState::Draining => write!(f, "draining"),
            RunState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Formats validation failures grouped by scorer, one line each.
fn format_failures(failures: &BTreeMap<String, Vec<Uuid>>) -> String {
    failures
        .iter()
        .map(|(scorer, ids)| {
            let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
            format!("- {}: {}", scorer, ids.join(","))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Errors that abort a run before or during orchestration.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// One or more samples failed their scorer's pre-flight contract.
    #[error("Invalid samples\n{}", format_failures(.failures))]
    Validation {
        failures: BTreeMap<String, Vec<Uuid>>,
    },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// What a finished run reports back.
#[derive(Debug)]
pub struct RunSummary {
    /// Wall-clock duration of the run.
    pub elapsed: chrono::Duration,
    /// Final counter values.
    pub snapshot: StatsSnapshot,
}

/// Coordinates one batch evaluation run.
pub struct Pipeline {
    config: Config,
    store: CheckpointStore,
    backend: Arc<dyn CompletionBackend>,
    state: RunState,
}

impl Pipeline {
    pub fn new(
        config: Config,
        store: CheckpointStore,
        backend: Arc<dyn CompletionBackend>,
    ) -> Self {
        Self {
            config,
            store,
            backend,
            state: RunState::Configuring,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Runs the batch to completion.
    pub async fn run(&mut self, mut samples: Vec<Sample>) -> Result<RunSummary, PipelineError> {
        self.state = RunState::Configuring;
        self.config.validate()?;

        let run_name = self
            .store
            .root()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "run".to_string());
        info!(run = %run_name, state = %self.state, samples = samples.len(), "Configuring run");

        // Samples aimed at unconfigured scorers cannot be processed.
        let before = samples.len();
        samples.retain(|sample| self.config.scorers.contains_key(&sample.evaluation.scorer));
        if samples.len() < before {
            warn!(
                dropped = before - samples.len(),
                "Dropped samples whose scorer is not configured"
            );
        }

        let scorers = self.build_scorers();
        self.validate_samples(&samples, &scorers)?;

        // Retry everything that permanently failed last time.
        self.store.clear_errors()?;

        let stats = Arc::new(RunStats::new(
            run_name.clone(),
            samples.len() as u64,
            self.config.models.iter().map(|m| m.model.clone()),
            self.config.scorers.keys().cloned(),
        ));
        let start = chrono::Utc::now();

        let registry = self.start_workers(&scorers, &stats);

        self.state = RunState::Running;
        info!(state = %self.state, "Submitting samples");
        for sample in &samples {
            registry.submit_sample(sample);
        }

        self.state = RunState::Draining;
        info!(state = %self.state, "Waiting for queues to drain");
        self.drain(&registry, &stats).await;

        self.state = RunState::Stopped;
        info!(state = %self.state, "Stopping workers");
        registry.shutdown().await;

        let elapsed = chrono::Utc::now() - start;
        let snapshot = stats.snapshot();
        info!(
            run = %run_name,
            elapsed = %elapsed,
            stats = %serde_json::to_string(&snapshot).unwrap_or_default(),
            "Run finished"
        );

        Ok(RunSummary { elapsed, snapshot })
    }

    /// Instantiates every configured scorer.
    fn build_scorers(&self) -> BTreeMap<String, Arc<dyn Scorer>> {
        self.config
            .scorers
            .iter()
            .filter_map(|(name, scorer_config)| {
                build_scorer(name, scorer_config, Arc::clone(&self.backend))
                    .map(|scorer| (name.clone(), scorer))
            })
            .collect()
    }

    /// Checks every sample against its scorer's contract; any failure
    /// aborts the run before a single network call.
    fn validate_samples(
        &self,
        samples: &[Sample],
        scorers: &BTreeMap<String, Arc<dyn Scorer>>,
    ) -> Result<(), PipelineError> {
        let mut failures: BTreeMap<String, Vec<Uuid>> = BTreeMap::new();

        for sample in samples {
            let scorer_name = &sample.evaluation.scorer;
            if let Some(scorer) = scorers.get(scorer_name) {
                if !scorer.validate_sample(sample) {
                    failures
                        .entry(scorer_name.clone())
                        .or_default()
                        .push(sample.id);
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Validation { failures })
        }
    }

    /// Creates the queues and spawns one pool per scorer and per model.
    fn start_workers(
        &self,
        scorers: &BTreeMap<String, Arc<dyn Scorer>>,
        stats: &Arc<RunStats>,
    ) -> WorkerRegistry {
        let mut registry = WorkerRegistry::new();

        // Scoring queues come first: generation workers hold a router over
        // them from the moment they start.
        registry.create_scorer_queues(self.config.scorers.keys().cloned());

        for (name, scorer_config) in &self.config.scorers {
            let queue = registry
                .scorer_queue(name)
                .expect("queue created for every configured scorer");
            let ctx = ScoringContext {
                scorer_name: name.clone(),
                scorer: Arc::clone(&scorers[name]),
                store: self.store.clone(),
                stats: Arc::clone(stats),
                queue,
            };
            info!(scorer = %name, parallelism = scorer_config.parallelism, "Starting scorer workers");
            registry.add_pool(WorkerPool::spawn(
                format!("scorer:{}", name),
                scorer_config.parallelism,
                move |_| run_scorer(ctx.clone()),
            ));
        }

        for model_config in &self.config.models {
            let queue = registry.create_generator_queue(&model_config.model);
            let ctx = GenerationContext::new(
                self.store.clone(),
                model_config.clone(),
                Arc::clone(&self.backend),
                Arc::clone(stats),
                registry.router(),
                queue,
            );
            info!(
                model = %model_config.model,
                parallelism = model_config.parallelism,
                "Starting generator workers"
            );
            registry.add_pool(WorkerPool::spawn(
                format!("generate:{}", model_config.model),
                model_config.parallelism,
                move |_| run_generator(ctx.clone()),
            ));
        }

        registry
    }

    /// Waits until every queue is idle, logging progress along the way.
    async fn drain(&self, registry: &WorkerRegistry, stats: &Arc<RunStats>) {
        let drain = registry.drain_signal();
        loop {
            let notified = drain.notified();
            if registry.all_idle() {
                return;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(PROGRESS_INTERVAL) => {
                    info!(
                        current = stats.current(),
                        total = stats.total(),
                        in_flight = registry.unfinished(),
                        "Run in progress"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_state_display() {
        assert_eq!(RunState::Configuring.to_string(), "configuring");
        assert_eq!(RunState::Stopped.to_string(), "stopped");
    }

    #[test]
    fn test_validation_error_groups_by_scorer() {
        let mut failures = BTreeMap::new();
        failures.insert(
            "judgment".to_string(),
            vec![Uuid::nil(), Uuid::from_u128(1)],
        );
        failures.insert("exact_match".to_string(), vec![Uuid::from_u128(2)]);

        let err = PipelineError::Validation { failures };
        let text = err.to_string();

        assert!(text.contains("Invalid samples"));
        assert!(text.contains("- exact_match: 00000000-0000-0000-0000-000000000002"));
        assert!(text.contains(
            "- judgment: 00000000-0000-0000-0000-000000000000,00000000-0000-0000-0000-000000000001"
        ));
    }
}

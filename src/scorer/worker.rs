//! Scoring worker loop.
//!
//! Pops generated samples off one scorer's queue, skips the ones whose
//! result checkpoint already exists, and otherwise scores and persists.
//! Every scorer failure (a split vote included) is caught here, counted,
//! and logged; nothing a single sample does can take down the worker or
//! the run.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::schema::{SampleOutputsWithScore, SampleWithOutputs};
use crate::stats::{RunStats, ScoringOutcome};
use crate::worker::WorkQueue;

use super::Scorer;

/// Everything one scoring worker needs.
#[derive(Clone)]
pub struct ScoringContext {
    pub scorer_name: String,
    pub scorer: Arc<dyn Scorer>,
    pub store: CheckpointStore,
    pub stats: Arc<RunStats>,
    pub queue: WorkQueue<SampleWithOutputs>,
}

/// Run loop of one scoring worker.
pub async fn run_scorer(ctx: ScoringContext) {
    while let Some(sample_with_outputs) = ctx.queue.pop().await {
        let outcome = score_one(&ctx, &sample_with_outputs).await;
        ctx.stats.record_scoring(&ctx.scorer_name, outcome);
        ctx.queue.task_done();
    }
}

/// Scores one sample, returning the stats outcome. All failure paths are
/// absorbed here.
async fn score_one(ctx: &ScoringContext, sample_with_outputs: &SampleWithOutputs) -> ScoringOutcome {
    let sample = &sample_with_outputs.sample;
    let model = &sample_with_outputs.model_outputs.model;
    info!(sample_id = %sample.id, scorer = %ctx.scorer_name, "Starting scoring");

    let target = ctx
        .store
        .result_path(model, &sample.module, &sample.task, sample.id);
    debug!(path = %target.display(), "Checking result checkpoint");

    if ctx.store.exists(&target) {
        info!(sample_id = %sample.id, scorer = %ctx.scorer_name, "Result checkpoint hit, skipping");
        return ScoringOutcome::Skipped;
    }

    let scoring = match ctx.scorer.score(sample_with_outputs).await {
        Ok(scoring) => scoring,
        Err(err) => {
            warn!(sample_id = %sample.id, scorer = %ctx.scorer_name, error = %err, "Scoring failed");
            return ScoringOutcome::Error;
        }
    };

    let record = SampleOutputsWithScore {
        sample_with_outputs: sample_with_outputs.clone(),
        scoring,
    };
    if let Err(err) = ctx.store.store(&target, &record) {
        warn!(sample_id = %sample.id, scorer = %ctx.scorer_name, error = %err, "Failed to persist result checkpoint");
        return ScoringOutcome::Error;
    }

    info!(sample_id = %sample.id, scorer = %ctx.scorer_name, score = record.scoring.score, "Scoring done");
    ScoringOutcome::Success
}

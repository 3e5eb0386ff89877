//! Scorer interface and registry.
//!
//! A scorer is a trait object with two operations: a pre-flight contract
//! check (`validate_sample`, run fail-fast before anything hits the
//! network) and the judgment itself (`score`). Concrete scorers are
//! selected by name at construction; the heavy judging heuristics live
//! behind this seam.

pub mod exact;
pub mod judgment;
pub mod worker;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::consensus::VoteError;
use crate::error::CompletionError;
use crate::llm::CompletionBackend;
use crate::pipeline::config::ScorerConfig;
use crate::schema::{Sample, SampleWithOutputs, ScorerOutput};

pub use exact::ExactMatchScorer;
pub use judgment::ConsensusJudgeScorer;
pub use worker::{run_scorer, ScoringContext};

/// Registry name of the consensus-judge scorer.
pub const JUDGMENT: &str = "judgment";
/// Registry name of the exact-match scorer.
pub const EXACT_MATCH: &str = "exact_match";

/// Errors that can occur while scoring one sample.
#[derive(Debug, Error)]
pub enum ScorerError {
    /// The judge panel split without a majority.
    #[error(transparent)]
    Vote(#[from] VoteError),

    /// A completion outside the vote failed.
    #[error(transparent)]
    Completion(#[from] CompletionError),

    /// The sample's outputs are missing a piece the scorer needs.
    #[error("Missing output data: {0}")]
    MissingOutput(String),

    /// The sample's evaluation data is missing a piece the scorer needs.
    #[error("Missing evaluation data: {0}")]
    MissingData(String),
}

/// One pluggable scorer.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Pre-flight contract check, run before the pipeline starts.
    fn validate_sample(&self, sample: &Sample) -> bool;

    /// Judges one generated sample.
    async fn score(
        &self,
        sample_with_outputs: &SampleWithOutputs,
    ) -> Result<ScorerOutput, ScorerError>;
}

/// Whether `name` maps to a scorer this build knows.
pub fn is_known_scorer(name: &str) -> bool {
    matches!(name, JUDGMENT | EXACT_MATCH)
}

/// Whether the named scorer needs a judge panel configured.
pub fn requires_judges(name: &str) -> bool {
    matches!(name, JUDGMENT)
}

/// Builds the scorer registered under `name`.
///
/// Returns `None` for unknown names; configuration validation rejects
/// those before a run starts.
pub fn build_scorer(
    name: &str,
    config: &ScorerConfig,
    backend: Arc<dyn CompletionBackend>,
) -> Option<Arc<dyn Scorer>> {
    match name {
        JUDGMENT => Some(Arc::new(ConsensusJudgeScorer::new(
            config.judges.clone(),
            backend,
        ))),
        EXACT_MATCH => Some(Arc::new(ExactMatchScorer::new())),
        _ => None,
    }
}

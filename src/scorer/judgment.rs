//! Generic LLM-judge scorer backed by the consensus voter.
//!
//! The sample's evaluation data carries a free-text `criterion` (and an
//! optional `context`); the panel of judges is asked whether the model's
//! answer satisfies the criterion and their weighted votes decide the
//! score. The raw votes travel in the result's details for audits.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::consensus::majority_vote;
use crate::llm::{CompletionBackend, Message};
use crate::pipeline::config::JudgeConfig;
use crate::schema::{Sample, SampleWithOutputs, ScorerOutput};

use super::{Scorer, ScorerError};

const SYSTEM_PROMPT: &str = "You are an impartial evaluator of AI assistant answers.\n\
You are given a criterion that a correct answer must satisfy, and sometimes\n\
additional context.\n\n\
Context: {context}\n\
Criterion: {criterion}\n\n\
Reply with a JSON object of the form\n\
{\"reason\": \"<one-sentence justification>\", \"decision\": <1 if the answer satisfies the criterion, 0 otherwise>}\n\
and nothing else.";

const EVALUATION_PROMPT: &str = "Question asked to the assistant:\n{question}\n\n\
Assistant answer to evaluate:\n{answer}";

/// Scores a sample by weighted majority vote of a judge panel.
pub struct ConsensusJudgeScorer {
    judges: Vec<JudgeConfig>,
    backend: Arc<dyn CompletionBackend>,
}

impl ConsensusJudgeScorer {
    pub fn new(judges: Vec<JudgeConfig>, backend: Arc<dyn CompletionBackend>) -> Self {
        Self { judges, backend }
    }
}

#[async_trait]
impl Scorer for ConsensusJudgeScorer {
    fn validate_sample(&self, sample: &Sample) -> bool {
        let valid = !sample.generations.is_empty()
            && sample
                .evaluation
                .data
                .get("criterion")
                .and_then(|v| v.as_str())
                .is_some();
        if !valid {
            warn!(
                sample_id = %sample.id,
                generations = sample.generations.len(),
                evaluation_keys = ?sample.evaluation.data.keys().collect::<Vec<_>>(),
                "Invalid sample for judgment scorer"
            );
        }
        valid
    }

    async fn score(
        &self,
        sample_with_outputs: &SampleWithOutputs,
    ) -> Result<ScorerOutput, ScorerError> {
        let sample = &sample_with_outputs.sample;

        let answer = sample_with_outputs
            .model_outputs
            .outputs
            .first()
            .and_then(|output| output.first_content())
            .ok_or_else(|| ScorerError::MissingOutput("first output has no content".to_string()))?;

        let question = sample
            .generations
            .first()
            .and_then(|generation| generation.messages.last())
            .and_then(|message| message.content.as_deref())
            .unwrap_or_default();

        let criterion = sample
            .evaluation
            .data
            .get("criterion")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ScorerError::MissingData("criterion".to_string()))?;
        let context = sample
            .evaluation
            .data
            .get("context")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let messages = vec![
            Message::system(
                SYSTEM_PROMPT
                    .replace("{context}", context)
                    .replace("{criterion}", criterion),
            ),
            Message::user(
                EVALUATION_PROMPT
                    .replace("{question}", question)
                    .replace("{answer}", answer),
            ),
        ];

        info!(sample_id = %sample.id, "Starting majority vote");
        let vote = majority_vote(
            self.backend.as_ref(),
            &self.judges,
            &messages,
            "decision",
            Some(&json!({"type": "json_object"})),
        )
        .await?;
        info!(sample_id = %sample.id, decision = vote.decision, "Majority vote done");

        let mut details = serde_json::Map::new();
        details.insert("raw_responses".to_string(), vote.votes.into());

        Ok(ScorerOutput {
            score: if vote.decision { 1.0 } else { 0.0 },
            details,
            usage: vote.usage,
        })
    }
}

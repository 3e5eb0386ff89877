//! Deterministic reference scorer: exact string comparison.
//!
//! Compares the first generated answer against the `expected` value in the
//! sample's evaluation data, after trimming surrounding whitespace. No
//! judge calls, no usage. Useful as a cheap baseline and as the
//! deterministic leg of pipeline tests.

use async_trait::async_trait;
use tracing::warn;

use crate::schema::{Sample, SampleWithOutputs, ScorerOutput};

use super::{Scorer, ScorerError};

/// Scores 1.0 when the trimmed answer equals the expected string.
#[derive(Debug, Default)]
pub struct ExactMatchScorer;

impl ExactMatchScorer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Scorer for ExactMatchScorer {
    fn validate_sample(&self, sample: &Sample) -> bool {
        let valid = !sample.generations.is_empty()
            && sample
                .evaluation
                .data
                .get("expected")
                .and_then(|v| v.as_str())
                .is_some();
        if !valid {
            warn!(
                sample_id = %sample.id,
                evaluation_keys = ?sample.evaluation.data.keys().collect::<Vec<_>>(),
                "Invalid sample for exact-match scorer"
            );
        }
        valid
    }

    async fn score(
        &self,
        sample_with_outputs: &SampleWithOutputs,
    ) -> Result<ScorerOutput, ScorerError> {
        let expected = sample_with_outputs
            .sample
            .evaluation
            .data
            .get("expected")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ScorerError::MissingData("expected".to_string()))?;

        let answer = sample_with_outputs
            .model_outputs
            .outputs
            .first()
            .and_then(|output| output.first_content())
            .ok_or_else(|| ScorerError::MissingOutput("first output has no content".to_string()))?;

        let matched = answer.trim() == expected.trim();

        let mut details = serde_json::Map::new();
        details.insert("expected".to_string(), expected.into());
        details.insert("answer".to_string(), answer.into());

        Ok(ScorerOutput {
            score: if matched { 1.0 } else { 0.0 },
            details,
            usage: Default::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;
    use crate::schema::{
        EvaluationData, Generation, ModelOutputs, Output, OutputChoice, OutputUsage,
    };
    use serde_json::Map;
    use uuid::Uuid;

    fn sample_with_answer(expected: &str, answer: &str) -> SampleWithOutputs {
        let mut data = Map::new();
        data.insert("expected".to_string(), expected.into());
        SampleWithOutputs {
            sample: Sample {
                id: Uuid::new_v4(),
                module: "m".to_string(),
                task: "t".to_string(),
                language: "en".to_string(),
                generations: vec![Generation {
                    id: Uuid::new_v4(),
                    messages: vec![Message::user("q")],
                    params: Default::default(),
                    metadata: Map::new(),
                    num_repeats: 1,
                }],
                metadata: Map::new(),
                evaluation: EvaluationData {
                    scorer: super::super::EXACT_MATCH.to_string(),
                    data,
                },
            },
            model_outputs: ModelOutputs {
                model: "mock/model".to_string(),
                outputs: vec![Output {
                    id: Uuid::new_v4(),
                    choices: vec![OutputChoice {
                        finish_reason: "stop".to_string(),
                        index: 0,
                        message: Message::assistant(answer),
                    }],
                    created: String::new(),
                    usage: OutputUsage {
                        prompt_tokens: 0,
                        completion_tokens: 0,
                        total_tokens: 0,
                        cost: None,
                    },
                    raw_responses: vec![],
                }],
            },
        }
    }

    #[tokio::test]
    async fn test_trimmed_match_scores_one() {
        let scorer = ExactMatchScorer::new();
        let scored = scorer
            .score(&sample_with_answer("Paris", "  Paris \n"))
            .await
            .expect("score");
        assert_eq!(scored.score, 1.0);
    }

    #[tokio::test]
    async fn test_mismatch_scores_zero_and_keeps_evidence() {
        let scorer = ExactMatchScorer::new();
        let scored = scorer
            .score(&sample_with_answer("Paris", "Lyon"))
            .await
            .expect("score");
        assert_eq!(scored.score, 0.0);
        assert_eq!(scored.details["expected"], "Paris");
        assert_eq!(scored.details["answer"], "Lyon");
    }

    #[test]
    fn test_validate_requires_expected() {
        let scorer = ExactMatchScorer::new();
        let valid = sample_with_answer("Paris", "Paris");
        assert!(scorer.validate_sample(&valid.sample));

        let mut invalid = valid.sample.clone();
        invalid.evaluation.data.clear();
        assert!(!scorer.validate_sample(&invalid));
    }
}

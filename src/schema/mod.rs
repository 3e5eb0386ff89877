//! Core value types for the evaluation pipeline.
//!
//! Samples are loaded once, cloned into every generation queue, and never
//! mutated in place after that: each stage produces a new value
//! (`Sample` -> `SampleWithOutputs` -> `SampleOutputsWithScore`) that is
//! serialized as a checkpoint. Unknown JSON keys are ignored on input so
//! third-party sample files with extra metadata still load.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::llm::Message;

/// Parameters attached to a single generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: f64,
    /// Tool definitions the model may call, forwarded verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    /// Maximum number of tokens to generate.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Extra provider-specific body fields, forwarded verbatim.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra_body: serde_json::Map<String, Value>,
}

fn default_max_tokens() -> u32 {
    4096
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            tools: None,
            max_tokens: default_max_tokens(),
            extra_body: serde_json::Map::new(),
        }
    }
}

/// One chat-completion request within a sample, possibly repeated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    /// Identifier, unique within the owning sample.
    pub id: Uuid,
    /// Conversation to send to the model.
    pub messages: Vec<Message>,
    /// Request parameters.
    #[serde(default)]
    pub params: GenerationParams,
    /// Free-form metadata carried through to checkpoints.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
    /// Number of independent completions requested for this generation.
    #[serde(default = "default_num_repeats")]
    pub num_repeats: u32,
}

fn default_num_repeats() -> u32 {
    1
}

/// Names the scorer that will judge a sample, plus scorer-specific data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationData {
    /// Registry name of the scorer.
    pub scorer: String,
    /// Scorer-specific payload (criteria, expected values, ...).
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
}

/// One evaluation unit: prompts plus the recipe for judging the responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    /// Globally unique identifier within a run.
    pub id: Uuid,
    /// Module classification (e.g. "hallucination").
    pub module: String,
    /// Task classification within the module.
    pub task: String,
    /// Language of the prompts.
    pub language: String,
    /// Ordered list of chat requests to run against each model.
    pub generations: Vec<Generation>,
    /// Free-form metadata carried through to checkpoints.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
    /// Scorer selection and scorer-specific data.
    pub evaluation: EvaluationData,
}

/// Token and cost accounting for one or more completions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    /// Dollar cost reported by the provider, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl OutputUsage {
    /// Component-wise sum. The cost survives only when both sides report
    /// one; a missing cost on either side makes the sum unknowable.
    pub fn combine(&self, other: &OutputUsage) -> OutputUsage {
        OutputUsage {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            completion_tokens: self.completion_tokens + other.completion_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
            cost: match (self.cost, other.cost) {
                (Some(a), Some(b)) => Some(a + b),
                _ => None,
            },
        }
    }
}

/// A single completion choice kept in an [`Output`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputChoice {
    /// Reason the generation stopped (e.g. "stop", "length", "tool_calls").
    pub finish_reason: String,
    /// Position of this choice within the combined output.
    pub index: u32,
    /// Generated message.
    pub message: Message,
}

/// Combined result of one generation's repeats against one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    /// Id of the generation that produced this output.
    pub id: Uuid,
    /// All choices across repeats, re-indexed 0..k-1.
    pub choices: Vec<OutputChoice>,
    /// Provider creation timestamp (RFC 3339) of the first repeat.
    pub created: String,
    /// Usage summed across repeats.
    pub usage: OutputUsage,
    /// Raw provider responses, one per repeat, kept for audits.
    #[serde(default)]
    pub raw_responses: Vec<Value>,
}

impl Output {
    /// Merges `other` into `self`: choices are concatenated (with `other`'s
    /// indices shifted past `self`'s), usage is summed, and raw responses
    /// are appended. The id and creation time of `self` win.
    pub fn combine(mut self, other: Output) -> Output {
        let offset = self.choices.len() as u32;
        self.choices
            .extend(other.choices.into_iter().enumerate().map(|(i, c)| OutputChoice {
                finish_reason: c.finish_reason,
                index: offset + i as u32,
                message: c.message,
            }));
        self.usage = self.usage.combine(&other.usage);
        self.raw_responses.extend(other.raw_responses);
        self
    }

    /// Content of the first choice, if any.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.message.content.as_deref())
    }
}

/// All outputs produced by one model for one sample, in generation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelOutputs {
    /// Model identifier that produced the outputs.
    pub model: String,
    /// One output per generation, in the sample's generation order.
    pub outputs: Vec<Output>,
}

/// A sample paired with one model's outputs; the unit of work for scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleWithOutputs {
    pub sample: Sample,
    pub model_outputs: ModelOutputs,
}

/// Result of scoring one [`SampleWithOutputs`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerOutput {
    /// Score in [0, 1]; 1 is best.
    pub score: f64,
    /// Free-form evidence kept for audits (raw votes, matched spans, ...).
    #[serde(default)]
    pub details: serde_json::Map<String, Value>,
    /// Usage spent during scoring, keyed by judge model.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub usage: HashMap<String, OutputUsage>,
}

/// The terminal artifact of the pipeline, persisted as a result checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleOutputsWithScore {
    pub sample_with_outputs: SampleWithOutputs,
    pub scoring: ScorerOutput,
}

/// A sample serialized next to the error that permanently failed it.
///
/// Flattened so the error record reads as the sample plus one `error` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedSample {
    #[serde(flatten)]
    pub sample: Sample,
    pub error: String,
}

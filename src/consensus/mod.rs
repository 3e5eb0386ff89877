//! Weighted majority voting across a panel of judge models.
//!
//! All judges are queried concurrently; each response contributes the vote
//! found in its JSON payload, weighted by configuration. A judge whose
//! response cannot be parsed is logged and simply absent from both weight
//! sums, but its configured weight still counts toward the total, so
//! abstentions make a majority harder to reach, never easier. A split with
//! no majority on either side is an error, not a verdict.

use std::collections::HashMap;

use futures::future::try_join_all;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};

use crate::error::CompletionError;
use crate::llm::{complete_with_retry, CompletionBackend, CompletionRequest, Message, RetryPolicy};
use crate::pipeline::config::JudgeConfig;
use crate::schema::OutputUsage;

/// Errors that can occur during a consensus vote.
#[derive(Debug, Error)]
pub enum VoteError {
    /// Neither side gathered a strict majority of the total weight.
    #[error(
        "No consensus reached: pass_weight={pass_weight}, fail_weight={fail_weight}, total_weight={total_weight}"
    )]
    NoConsensus {
        pass_weight: f64,
        fail_weight: f64,
        total_weight: f64,
    },

    /// A judge completion failed outright (after its retry budget).
    #[error("Judge completion failed: {0}")]
    Completion(#[from] CompletionError),
}

/// Outcome of a consensus vote, kept whole for audits.
#[derive(Debug, Clone)]
pub struct MajorityVote {
    /// The winning verdict.
    pub decision: bool,
    /// Raw per-judge votes: `{model: {response, weight, reason?}}`.
    pub votes: serde_json::Map<String, Value>,
    /// Usage per judge model.
    pub usage: HashMap<String, OutputUsage>,
}

/// Extracts the first balanced JSON object embedded in `text`.
///
/// Judge models often wrap their JSON in prose or code fences; this scans
/// for the first `{`, tracks brace depth outside string literals, and
/// parses the balanced slice.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..=start + offset];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Normalizes a decision value: `1`/`true` pass, `0`/`false` fail, anything
/// else is recorded but counted for neither side.
fn decision_vote(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Builds the completion request for one judge.
fn judge_request(
    judge: &JudgeConfig,
    messages: &[Message],
    response_format: Option<&Value>,
) -> CompletionRequest {
    let mut request = CompletionRequest::new(judge.model.clone(), messages.to_vec())
        .with_temperature(judge.params.temperature)
        .with_max_tokens(judge.params.max_tokens)
        .with_n(judge.params.n);
    request.response_format = response_format.cloned();
    request
}

/// Runs one weighted majority vote.
///
/// Issues every judge completion concurrently, extracts `decision_key`
/// from each JSON response, and aggregates: decision is true when the
/// passing weight exceeds half the total configured weight, false when the
/// failing weight does, and [`VoteError::NoConsensus`] otherwise.
pub async fn majority_vote(
    backend: &dyn CompletionBackend,
    judges: &[JudgeConfig],
    messages: &[Message],
    decision_key: &str,
    response_format: Option<&Value>,
) -> Result<MajorityVote, VoteError> {
    // Judge calls run with a retry budget of one; rate limits still wait.
    let policy = RetryPolicy::new(1);

    let responses = try_join_all(judges.iter().map(|judge| {
        let request = judge_request(judge, messages, response_format);
        let region = judge.params.region.clone();
        let policy = &policy;
        async move {
            complete_with_retry(backend, request, policy, region.as_deref(), false).await
        }
    }))
    .await?;

    let mut votes = serde_json::Map::new();
    let mut usage = HashMap::new();
    let mut pass_weight = 0.0;
    let mut fail_weight = 0.0;

    for (judge, response) in judges.iter().zip(responses.iter()) {
        let content = response.first_content().unwrap_or_default();
        let Some(payload) = extract_json_object(content) else {
            error!(judge = %judge.model, content = %content, "Unparsable judge response, dropping vote");
            continue;
        };
        let Some(raw_decision) = payload.get(decision_key).cloned() else {
            error!(judge = %judge.model, key = %decision_key, "Judge response missing decision field, dropping vote");
            continue;
        };

        match decision_vote(&raw_decision) {
            Some(true) => pass_weight += judge.weight,
            Some(false) => fail_weight += judge.weight,
            None => {
                info!(judge = %judge.model, value = %raw_decision, "Judge decision is neither pass nor fail");
            }
        }

        let mut vote = serde_json::Map::new();
        vote.insert("response".to_string(), raw_decision);
        vote.insert("weight".to_string(), judge.weight.into());
        if let Some(reason) = payload.get("reason") {
            vote.insert("reason".to_string(), reason.clone());
        }
        votes.insert(judge.model.clone(), Value::Object(vote));

        usage.insert(
            judge.model.clone(),
            OutputUsage {
                prompt_tokens: response.usage.prompt_tokens,
                completion_tokens: response.usage.completion_tokens,
                total_tokens: response.usage.total_tokens,
                cost: response.usage.cost,
            },
        );
    }

    let total_weight: f64 = judges.iter().map(|j| j.weight).sum();

    if pass_weight > total_weight / 2.0 {
        Ok(MajorityVote {
            decision: true,
            votes,
            usage,
        })
    } else if fail_weight > total_weight / 2.0 {
        Ok(MajorityVote {
            decision: false,
            votes,
            usage,
        })
    } else {
        Err(VoteError::NoConsensus {
            pass_weight,
            fail_weight,
            total_weight,
        })
    }
}

//! Retry policy for completion calls.
//!
//! Every attempt draws a fresh jittered wait from a fixed window. A rate
//! limit never consumes budget; the loop just waits and goes again. Any
//! other failure consumes one unit, and an exhausted budget surfaces as
//! [`CompletionError::ExhaustedRetries`] wrapping the last cause. The whole
//! loop is abandoned at its await points when the owning worker task is
//! aborted, so shutdown never sits out a backoff sleep.

use std::env;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::CompletionError;
use crate::llm::client::{CompletionBackend, CompletionRequest, CompletionResponse};

/// Environment variable prefix for region-scoped credentials.
const CREDENTIAL_PREFIX: &str = "AWS_BEARER_TOKEN_BEDROCK";

/// Retry budget plus backoff window for one logical completion.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Number of non-rate-limit failures tolerated before giving up.
    budget: u32,
    /// Lower bound of the backoff window.
    backoff_min: Duration,
    /// Upper bound of the backoff window.
    backoff_max: Duration,
}

impl RetryPolicy {
    /// Creates a policy with the given budget and the default 60–120 s
    /// backoff window.
    pub fn new(budget: u32) -> Self {
        Self {
            budget: budget.max(1),
            backoff_min: Duration::from_secs(60),
            backoff_max: Duration::from_secs(120),
        }
    }

    /// Overrides the backoff window. Tests use millisecond windows.
    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.backoff_min = min;
        self.backoff_max = max.max(min);
        self
    }

    /// The configured budget.
    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Draws one jittered wait, uniform over the configured window.
    fn backoff(&self) -> Duration {
        let min = self.backoff_min.as_secs_f64();
        let max = self.backoff_max.as_secs_f64();
        Duration::from_secs_f64(min + (max - min) * rand::random::<f64>())
    }
}

/// Resolves the credential for a region from the environment.
///
/// The variable name is `AWS_BEARER_TOKEN_BEDROCK_<REGION>` with the region
/// uppercased and dashes replaced by underscores, e.g. `us-east-1` →
/// `AWS_BEARER_TOKEN_BEDROCK_US_EAST_1`.
pub fn region_credential(region: &str) -> Option<String> {
    let normalized = region.to_uppercase().replace('-', "_");
    let var = format!("{}_{}", CREDENTIAL_PREFIX, normalized);
    let credential = env::var(&var).ok();
    if credential.is_none() {
        debug!(variable = %var, "No credential found for region");
    }
    credential
}

/// Runs one logical completion through the retry loop.
///
/// When `region` is set, the request is authenticated with that region's
/// credential. When `ensure_json` is set, a response whose first choice
/// content does not parse as JSON counts as a generic failure (it consumes
/// budget like any transient error).
pub async fn complete_with_retry(
    backend: &dyn CompletionBackend,
    mut request: CompletionRequest,
    policy: &RetryPolicy,
    region: Option<&str>,
    ensure_json: bool,
) -> Result<CompletionResponse, CompletionError> {
    if let Some(region) = region {
        request.api_key = region_credential(region);
    }

    let model = request.model.clone();
    let mut failures = 0u32;

    loop {
        let wait = policy.backoff();
        let outcome = match backend.complete(request.clone()).await {
            Ok(response) if ensure_json => validate_json_content(response),
            other => other,
        };

        match outcome {
            Ok(response) => return Ok(response),
            Err(err) if err.is_rate_limit() => {
                warn!(model = %model, error = %err, wait_secs = wait.as_secs_f64(), "Hitting rate limit, staggering retry");
                tokio::time::sleep(wait).await;
            }
            Err(err) => {
                failures += 1;
                if failures >= policy.budget {
                    return Err(CompletionError::ExhaustedRetries {
                        attempts: failures,
                        source: Box::new(err),
                    });
                }
                warn!(model = %model, error = %err, wait_secs = wait.as_secs_f64(), "Completion failed, retrying after backoff");
                tokio::time::sleep(wait).await;
            }
        }
    }
}

/// Checks that the first choice's content is valid JSON.
fn validate_json_content(
    response: CompletionResponse,
) -> Result<CompletionResponse, CompletionError> {
    let content = response.first_content().ok_or(CompletionError::MissingChoices)?;
    serde_json::from_str::<serde_json::Value>(content)
        .map_err(|e| CompletionError::ParseError(format!("Strict-JSON validation failed: {}", e)))?;
    Ok(response)
}

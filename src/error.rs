//! Error types shared across the completion layer.
//!
//! The two retry-relevant failure kinds are explicit variants so retry
//! policy can differ by kind without inspecting messages: `RateLimited` is
//! retried indefinitely, everything else consumes the retry budget.

use thiserror::Error;

/// Errors raised when calling the completion service.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// The provider rejected the request because of rate limiting.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The HTTP request itself failed (connection, timeout, ...).
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// The provider returned a non-success status other than 429.
    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    /// The response body could not be parsed into the expected shape, or
    /// strict-JSON validation of the message content failed.
    #[error("Failed to parse completion response: {0}")]
    ParseError(String),

    /// The response carried no choices to read.
    #[error("Completion response contained no choices")]
    MissingChoices,

    /// The retry budget ran out; wraps the failure of the last attempt.
    #[error("Retry budget exhausted after {attempts} attempts: {source}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        source: Box<CompletionError>,
    },
}

impl CompletionError {
    /// Whether this failure kind is retried without consuming budget.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, CompletionError::RateLimited(_))
    }
}

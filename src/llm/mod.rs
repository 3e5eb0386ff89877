//! Completion-service client: one OpenAI-compatible HTTP client plus the
//! retry layer every pipeline stage goes through.

pub mod client;
pub mod retry;

pub use client::{
    Choice, CompletionBackend, CompletionClient, CompletionRequest, CompletionResponse, Message,
    Usage,
};
pub use retry::{complete_with_retry, region_credential, RetryPolicy};

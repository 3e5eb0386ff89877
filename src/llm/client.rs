//! HTTP client for OpenAI-compatible chat-completion endpoints.
//!
//! A single `CompletionClient` is shared by every worker in a run. Failure
//! classification happens here: HTTP 429 maps to
//! [`CompletionError::RateLimited`], any other non-success status to
//! [`CompletionError::ApiError`], and transport failures to
//! [`CompletionError::RequestFailed`]. The retry policy on top of this
//! client lives in [`super::retry`].

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::time::Duration;

use crate::error::CompletionError;

/// A message in a conversation with a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (e.g. "system", "user", "assistant").
    pub role: String,
    /// Text content; absent for pure tool-call messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool invocations requested by the model, forwarded verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Value>,
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.into()),
            tool_calls: None,
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.into()),
            tool_calls: None,
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: Some(content.into()),
            tool_calls: None,
        }
    }
}

/// One chat-completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model identifier to call.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Number of completions to request in one call.
    pub n: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Maximum number of tokens to generate.
    pub max_tokens: Option<u32>,
    /// Tool definitions the model may call.
    pub tools: Option<Value>,
    /// Response format constraint (e.g. a JSON schema), forwarded verbatim.
    pub response_format: Option<Value>,
    /// Extra provider-specific body fields, merged into the request body.
    pub extra_body: serde_json::Map<String, Value>,
    /// Per-request credential override; set by the retry layer when a
    /// region-scoped credential applies. Never serialized.
    pub api_key: Option<String>,
}

impl CompletionRequest {
    /// Create a new request with default parameters.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            n: None,
            temperature: None,
            max_tokens: None,
            tools: None,
            response_format: None,
            extra_body: serde_json::Map::new(),
            api_key: None,
        }
    }

    /// Set the temperature for this request.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the max tokens for this request.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the number of completions for this request.
    pub fn with_n(mut self, n: u32) -> Self {
        self.n = Some(n);
        self
    }

    /// Set the tool definitions for this request.
    pub fn with_tools(mut self, tools: Value) -> Self {
        self.tools = Some(tools);
        self
    }
}

/// A single generated choice from the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    /// Index of this choice in the response.
    pub index: u32,
    /// Generated message.
    pub message: Message,
    /// Reason the generation stopped (e.g. "stop", "length").
    pub finish_reason: String,
}

/// Token usage statistics for one completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    /// Dollar cost, present when the gateway reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// Response from a chat-completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Provider-assigned response identifier.
    pub id: String,
    /// Model that produced the response.
    pub model: String,
    /// Unix timestamp of response creation.
    pub created: i64,
    /// Generated choices.
    pub choices: Vec<Choice>,
    /// Token usage statistics.
    pub usage: Usage,
}

impl CompletionResponse {
    /// Content of the first choice, if available.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.message.content.as_deref())
    }
}

/// The completion service seam. Workers and scorers only see this trait, so
/// tests substitute a scripted backend and count the calls that reach it.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Issue one chat-completion request.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError>;
}

/// Client for OpenAI-compatible completion gateways.
pub struct CompletionClient {
    /// Base URL for the API.
    api_base: String,
    /// Default API key; a request-level key takes precedence.
    api_key: Option<String>,
    /// HTTP client for making API requests.
    http_client: Client,
}

impl CompletionClient {
    /// Create a new client with explicit configuration.
    pub fn new(api_base: String, api_key: Option<String>) -> Self {
        Self {
            api_base,
            api_key,
            http_client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Create a client from environment variables.
    ///
    /// Reads `LITELLM_API_BASE` (required) and `LITELLM_API_KEY` (optional).
    ///
    /// # Errors
    ///
    /// Returns `CompletionError::RequestFailed` if `LITELLM_API_BASE` is
    /// not set.
    pub fn from_env() -> Result<Self, CompletionError> {
        let api_base = env::var("LITELLM_API_BASE").map_err(|_| {
            CompletionError::RequestFailed(
                "LITELLM_API_BASE environment variable not set".to_string(),
            )
        })?;
        let api_key = env::var("LITELLM_API_KEY").ok();
        Ok(Self::new(api_base, api_key))
    }

    /// Get the API base URL.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Serialize a request into the JSON body sent over the wire.
    fn request_body(request: &CompletionRequest) -> serde_json::Map<String, Value> {
        let mut body = serde_json::Map::new();
        body.insert("model".to_string(), Value::String(request.model.clone()));
        body.insert(
            "messages".to_string(),
            serde_json::to_value(&request.messages).unwrap_or(Value::Null),
        );
        if let Some(n) = request.n {
            body.insert("n".to_string(), n.into());
        }
        if let Some(temperature) = request.temperature {
            body.insert("temperature".to_string(), temperature.into());
        }
        if let Some(max_tokens) = request.max_tokens {
            body.insert("max_tokens".to_string(), max_tokens.into());
        }
        if let Some(ref tools) = request.tools {
            body.insert("tools".to_string(), tools.clone());
        }
        if let Some(ref format) = request.response_format {
            body.insert("response_format".to_string(), format.clone());
        }
        for (key, value) in &request.extra_body {
            body.insert(key.clone(), value.clone());
        }
        body
    }
}

/// Error response from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

/// Error detail from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl CompletionBackend for CompletionClient {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = Self::request_body(&request);

        let mut http_request = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json");

        let api_key = request.api_key.as_ref().or(self.api_key.as_ref());
        if let Some(key) = api_key {
            http_request = http_request.header("Authorization", format!("Bearer {}", key));
        }

        let http_response = http_request
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::RequestFailed(e.to_string()))?;

        let status = http_response.status();

        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map(|r| r.error.message)
                .unwrap_or(error_text);

            if status_code == 429 {
                return Err(CompletionError::RateLimited(message));
            }
            return Err(CompletionError::ApiError {
                code: status_code,
                message,
            });
        }

        http_response
            .json()
            .await
            .map_err(|e| CompletionError::ParseError(format!("Invalid API response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let system = Message::system("You judge answers.");
        assert_eq!(system.role, "system");
        assert_eq!(system.content.as_deref(), Some("You judge answers."));

        let user = Message::user("Hello");
        assert_eq!(user.role, "user");

        let assistant = Message::assistant("Hi there!");
        assert_eq!(assistant.role, "assistant");
        assert!(assistant.tool_calls.is_none());
    }

    #[test]
    fn test_request_builder() {
        let request = CompletionRequest::new("gpt-4", vec![Message::user("test")])
            .with_temperature(0.7)
            .with_max_tokens(1000)
            .with_n(3);

        assert_eq!(request.model, "gpt-4");
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.max_tokens, Some(1000));
        assert_eq!(request.n, Some(3));
    }

    #[test]
    fn test_request_body_merges_extra_fields() {
        let mut request = CompletionRequest::new("gpt-4", vec![Message::user("test")])
            .with_temperature(0.0)
            .with_max_tokens(256);
        request
            .extra_body
            .insert("reasoning_effort".to_string(), "low".into());

        let body = CompletionClient::request_body(&request);

        assert_eq!(body["model"], "gpt-4");
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["reasoning_effort"], "low");
        assert!(!body.contains_key("n"));
        assert!(!body.contains_key("tools"));
    }

    #[test]
    fn test_response_first_content() {
        let response = CompletionResponse {
            id: "resp-1".to_string(),
            model: "gpt-4".to_string(),
            created: 1_760_000_000,
            choices: vec![Choice {
                index: 0,
                message: Message::assistant("Hello!"),
                finish_reason: "stop".to_string(),
            }],
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
                cost: None,
            },
        };

        assert_eq!(response.first_content(), Some("Hello!"));
    }

    #[test]
    fn test_response_parses_optional_cost() {
        let raw = serde_json::json!({
            "id": "resp-2",
            "model": "gpt-4",
            "created": 1760000000,
            "choices": [],
            "usage": {
                "prompt_tokens": 7,
                "completion_tokens": 2,
                "total_tokens": 9,
                "cost": 0.0042
            }
        });

        let response: CompletionResponse =
            serde_json::from_value(raw).expect("response should parse");
        assert_eq!(response.usage.cost, Some(0.0042));
    }

    #[tokio::test]
    async fn test_connection_error_maps_to_request_failed() {
        // Port unlikely to have a server listening.
        let client = CompletionClient::new("http://localhost:65535".to_string(), None);

        let request = CompletionRequest::new("gpt-4", vec![Message::user("test")]);
        let result = client.complete(request).await;

        assert!(matches!(result, Err(CompletionError::RequestFailed(_))));
    }
}

//! OpenAI-compatible chat-completions client.
//!
//! Requests ask for a JSON-object response. Retries are not done here; the
//! batch retry policy wraps every call, so errors are only classified.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::batch::{FailureKind, TaskFailure};
use crate::error::{ConfigError, LlmError};

/// Default API endpoint.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model to use if none specified.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Transport-level request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 180;

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Request for one chat completion.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    /// Model identifier; empty means the client default.
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Ask the model for a single JSON object.
    #[serde(skip)]
    pub json_mode: bool,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            json_mode: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_json_mode(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// Response of a chat completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub id: String,
    pub model: String,
    pub content: Option<String>,
    /// Set when the model declined to answer.
    pub refusal: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: Usage,
}

/// Token usage statistics for a generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Trait for LLM providers that can generate text.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;
}

/// Client for `/chat/completions` endpoints.
pub struct ChatClient {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl ChatClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingCredential` for an empty key and
    /// `ConfigError::HttpClient` if the HTTP client cannot be built.
    pub fn new(
        api_key: impl Into<String>,
        base_url: Option<String>,
        default_model: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential(API_KEY_ENV.to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        let base_url = base_url
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| OPENAI_BASE_URL.to_string());

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model: default_model.into(),
        })
    }

    /// Get the API key (for debugging, returns masked value).
    pub fn api_key_masked(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.len() <= 8 {
            "*".repeat(chars.len())
        } else {
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{}...{}", head, tail)
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn execute_request(&self, request: &ApiRequest) -> Result<GenerationResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let http_response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(e.to_string())
                } else {
                    LlmError::RequestFailed(e.to_string())
                }
            })?;

        let status = http_response.status();

        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(classify_api_error(status_code, &error_text));
        }

        let body = http_response
            .text()
            .await
            .map_err(|e| LlmError::RequestFailed(format!("failed to read response body: {}", e)))?;
        let api_response: ApiResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ParseError("response has no choices".to_string()))?;

        Ok(GenerationResponse {
            id: api_response.id,
            model: api_response.model,
            content: choice.message.content,
            refusal: choice.message.refusal,
            finish_reason: choice.finish_reason,
            usage: api_response.usage.unwrap_or_default(),
        })
    }
}

/// Maps a non-success response to an error.
fn classify_api_error(status_code: u16, body: &str) -> LlmError {
    let message = serde_json::from_str::<ApiErrorResponse>(body)
        .map(|parsed| parsed.error.message)
        .unwrap_or_else(|_| body.to_string());

    if status_code == 429 {
        return LlmError::RateLimited(message);
    }
    let lowered = message.to_lowercase();
    if status_code == 400
        && (lowered.contains("context length") || lowered.contains("context_length"))
    {
        return LlmError::ContextLengthExceeded(message);
    }
    LlmError::ApiError {
        code: status_code,
        message,
    }
}

#[async_trait]
impl LlmProvider for ChatClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model
        };

        let api_request = ApiRequest {
            model,
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request
                .json_mode
                .then(|| ResponseFormat {
                    kind: "json_object".to_string(),
                }),
        };

        self.execute_request(&api_request).await
    }
}

impl From<LlmError> for TaskFailure {
    fn from(err: LlmError) -> Self {
        let kind = match &err {
            LlmError::Timeout(_) | LlmError::RequestFailed(_) => FailureKind::Transient,
            LlmError::RateLimited(_) => FailureKind::RateLimited,
            LlmError::ApiError { code, .. } => FailureKind::from_status(*code),
            LlmError::ParseError(_)
            | LlmError::Refusal(_)
            | LlmError::ContextLengthExceeded(_) => FailureKind::Permanent,
        };
        TaskFailure::new(kind, err.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

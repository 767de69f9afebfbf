use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A chat message for the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Sampling parameters shared by every provider in a chain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self { temperature: 0.2, max_tokens: 1024 }
    }
}

/// Provider output. Token counts are `None` when the backend doesn't report usage.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), prompt_tokens: None, completion_tokens: None }
    }
}

/// The single capability every provider adapter satisfies.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request for `model` and return the assistant's response.
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<Completion, LlmError>;
}

/// Whether a failure is worth retrying against the same provider/model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Transient,
    Fatal,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("API error: {status} — {body}")]
    ApiError { status: u16, body: String },
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to parse response: {0}")]
    ParseError(String),
    #[error("provider not configured: {0}")]
    NotConfigured(String),
    #[error("invalid provider chain: {0}")]
    InvalidChain(String),
}

impl LlmError {
    /// Timeouts, overload and rate limiting are transient; everything else is fatal.
    pub fn kind(&self) -> FailureKind {
        let transient = match self {
            LlmError::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            LlmError::ApiError { status, .. } => {
                matches!(status, 408 | 425 | 429 | 500 | 502 | 503 | 504 | 529)
            }
            LlmError::Timeout(_) => true,
            LlmError::ParseError(_) | LlmError::NotConfigured(_) | LlmError::InvalidChain(_) => false,
        };
        if transient { FailureKind::Transient } else { FailureKind::Fatal }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }

    /// Credential problems affect every model of the provider, not just the current one.
    pub fn is_provider_wide(&self) -> bool {
        match self {
            LlmError::ApiError { status, .. } => matches!(status, 401 | 403),
            LlmError::NotConfigured(_) => true,
            _ => false,
        }
    }
}

/// Render role names the way OpenAI-compatible APIs expect them.
pub(crate) fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

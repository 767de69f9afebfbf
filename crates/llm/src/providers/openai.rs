use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::provider::{role_str, Completion, GenerationParams, LlmError, LlmProvider, Message};

use super::{check_status, usage_field};

/// OpenAI-compatible `/v1/chat/completions` adapter.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn build_request_body(model: &str, messages: &[Message], params: &GenerationParams) -> serde_json::Value {
        let api_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| json!({ "role": role_str(m.role), "content": m.content }))
            .collect();

        json!({
            "model": model,
            "messages": api_messages,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<Completion, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = Self::build_request_body(model, messages, params);

        debug!(model, "OpenAI request to {}", url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;

        let resp: serde_json::Value = response.json().await?;
        let text = resp["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::ParseError("missing choices[0].message.content".into()))?
            .to_string();

        Ok(Completion {
            text,
            prompt_tokens: usage_field(&resp["usage"]["prompt_tokens"]),
            completion_tokens: usage_field(&resp["usage"]["completion_tokens"]),
        })
    }
}

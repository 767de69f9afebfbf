use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::provider::{Completion, GenerationParams, LlmError, LlmProvider, Message, Role};

use super::{check_status, usage_field};

const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";

pub struct ClaudeProvider {
    client: reqwest::Client,
    api_key: String,
    url: String,
}

impl ClaudeProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        let url = base_url
            .map(|b| format!("{}/v1/messages", b.trim_end_matches('/')))
            .unwrap_or_else(|| ANTHROPIC_MESSAGES_URL.to_string());
        Self {
            client: reqwest::Client::new(),
            api_key,
            url,
        }
    }

    fn build_request_body(model: &str, messages: &[Message], params: &GenerationParams) -> serde_json::Value {
        // Claude API uses separate system parameter
        let system_msg = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let api_messages: Vec<serde_json::Value> = messages
            .iter()
            .filter_map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => return None,
                };
                Some(json!({ "role": role, "content": m.content }))
            })
            .collect();

        let mut body = json!({
            "model": model,
            "messages": api_messages,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        });

        if !system_msg.is_empty() {
            body["system"] = json!(system_msg);
        }
        body
    }
}

#[async_trait]
impl LlmProvider for ClaudeProvider {
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<Completion, LlmError> {
        let body = Self::build_request_body(model, messages, params);

        debug!(model, "Claude request to {}", self.url);

        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;

        let resp: serde_json::Value = response.json().await?;
        let text = resp["content"][0]["text"]
            .as_str()
            .ok_or_else(|| LlmError::ParseError("missing content[0].text".into()))?
            .to_string();

        Ok(Completion {
            text,
            prompt_tokens: usage_field(&resp["usage"]["input_tokens"]),
            completion_tokens: usage_field(&resp["usage"]["output_tokens"]),
        })
    }
}

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::provider::{role_str, Completion, GenerationParams, LlmError, LlmProvider, Message};

use super::{check_status, usage_field};

pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
}

impl OllamaProvider {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<Completion, LlmError> {
        let url = format!("{}/api/chat", self.url);

        let api_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| json!({ "role": role_str(m.role), "content": m.content }))
            .collect();

        let body = json!({
            "model": model,
            "messages": api_messages,
            "stream": false,
            "options": {
                "temperature": params.temperature,
                "num_predict": params.max_tokens,
            },
        });

        debug!(model, "Ollama request to {}", url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;

        let resp: serde_json::Value = response.json().await?;
        let text = resp["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::ParseError("missing message.content".into()))?
            .to_string();

        Ok(Completion {
            text,
            prompt_tokens: usage_field(&resp["prompt_eval_count"]),
            completion_tokens: usage_field(&resp["eval_count"]),
        })
    }
}

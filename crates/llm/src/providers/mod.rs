pub mod claude;
pub mod ollama;
pub mod openai;

use std::sync::Arc;

use askdesk_core::config::{LlmConfig, OllamaConfig};

use crate::chain::{ProviderDescriptor, ProviderKind};
use crate::provider::{LlmError, LlmProvider};

/// Create the adapter for one entry of the provider chain.
pub fn create_provider(
    descriptor: &ProviderDescriptor,
    llm_config: &LlmConfig,
    ollama_config: &OllamaConfig,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let api_key = |default_key: Option<&String>, default_env: &str| -> Result<String, LlmError> {
        let env_key = descriptor.api_key_env.as_deref().unwrap_or(default_env);
        std::env::var(env_key)
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| default_key.cloned())
            .ok_or_else(|| LlmError::NotConfigured(format!("{env_key} not set for provider '{}'", descriptor.id)))
    };

    match descriptor.kind {
        ProviderKind::OpenAi => {
            let key = api_key(llm_config.openai_api_key.as_ref(), "OPENAI_API_KEY")?;
            let base_url = descriptor
                .base_url
                .clone()
                .or_else(|| llm_config.openai_base_url.clone())
                .unwrap_or_else(|| "https://api.openai.com".to_string());
            Ok(Arc::new(openai::OpenAiProvider::new(key, base_url)))
        }
        ProviderKind::Anthropic => {
            let key = api_key(llm_config.anthropic_api_key.as_ref(), "ANTHROPIC_API_KEY")?;
            Ok(Arc::new(claude::ClaudeProvider::new(key, descriptor.base_url.clone())))
        }
        ProviderKind::Ollama => Ok(Arc::new(ollama::OllamaProvider::new(
            descriptor.base_url.clone().unwrap_or_else(|| ollama_config.url.clone()),
        ))),
    }
}

/// Turn non-2xx responses into `ApiError` so the gateway can classify them.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(LlmError::ApiError { status: status.as_u16(), body })
}

pub(crate) fn usage_field(value: &serde_json::Value) -> Option<u32> {
    value.as_u64().and_then(|v| u32::try_from(v).ok())
}

//! Ordered provider chain configuration.
//!
//! The chain is a static list of provider descriptors, tried front to back.
//! Each descriptor carries its own ordered model list (primary first, then
//! fallbacks) and retry policy. Loaded from `config/providers.toml`:
//!
//! ```toml
//! retry_max_delay_ms = 8000
//!
//! [[providers]]
//! id = "openai-primary"
//! kind = "openai"
//! models = ["gpt-4o-mini", "gpt-4o"]
//! max_retries = 3
//! retry_base_delay_ms = 500
//!
//! [[providers]]
//! id = "local"
//! kind = "ollama"
//! models = ["llama3.2"]
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use askdesk_core::config::{LlmConfig, OllamaConfig};

use crate::provider::LlmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(alias = "claude")]
    Anthropic,
    Ollama,
}

/// One entry of the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: String,
    pub kind: ProviderKind,
    /// Primary model first, then fallbacks. Exhausted before moving to the next provider.
    pub models: Vec<String>,
    /// Attempts per model for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Env var holding the API key (defaults per kind).
    #[serde(default)]
    pub api_key_env: Option<String>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

impl ProviderDescriptor {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

/// Parsed `providers.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderChain {
    #[serde(default)]
    pub retry_max_delay_ms: Option<u64>,
    pub providers: Vec<ProviderDescriptor>,
}

impl ProviderChain {
    /// Parse a chain from TOML text and validate it.
    pub fn from_toml(text: &str) -> Result<Self, LlmError> {
        let chain: ProviderChain =
            toml::from_str(text).map_err(|e| LlmError::InvalidChain(e.to_string()))?;
        chain.validate()?;
        Ok(chain)
    }

    /// Load the chain file when it exists, otherwise derive a one-provider chain
    /// from `LLM_PROVIDER` and the per-provider model settings.
    pub fn load(llm: &LlmConfig, ollama: &OllamaConfig) -> Result<Self, LlmError> {
        let path: &Path = &llm.providers_file;
        if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|e| {
                LlmError::InvalidChain(format!("failed to read {}: {e}", path.display()))
            })?;
            let chain = Self::from_toml(&text)?;
            info!(
                path = %path.display(),
                providers = chain.providers.len(),
                "loaded provider chain"
            );
            return Ok(chain);
        }

        let (kind, model) = match llm.provider.as_str() {
            "openai" => (ProviderKind::OpenAi, llm.openai_model.clone()),
            "anthropic" | "claude" => (ProviderKind::Anthropic, llm.anthropic_model.clone()),
            "ollama" => (ProviderKind::Ollama, ollama.model.clone()),
            other => {
                return Err(LlmError::NotConfigured(format!(
                    "unknown LLM provider: '{}'",
                    other
                )))
            }
        };
        info!(provider = %llm.provider, model = %model, "no provider chain file, using single provider");
        let chain = Self {
            retry_max_delay_ms: Some(llm.retry_max_delay_ms),
            providers: vec![ProviderDescriptor {
                id: llm.provider.clone(),
                kind,
                models: vec![model],
                max_retries: default_max_retries(),
                retry_base_delay_ms: default_retry_base_delay_ms(),
                base_url: None,
                api_key_env: None,
            }],
        };
        chain.validate()?;
        Ok(chain)
    }

    pub fn validate(&self) -> Result<(), LlmError> {
        if self.providers.is_empty() {
            return Err(LlmError::InvalidChain("chain has no providers".into()));
        }
        let mut seen = HashSet::new();
        for p in &self.providers {
            if !seen.insert(p.id.as_str()) {
                return Err(LlmError::InvalidChain(format!("duplicate provider id '{}'", p.id)));
            }
            if p.models.is_empty() {
                return Err(LlmError::InvalidChain(format!("provider '{}' lists no models", p.id)));
            }
            if p.max_retries == 0 {
                return Err(LlmError::InvalidChain(format!("provider '{}' has max_retries = 0", p.id)));
            }
        }
        Ok(())
    }
}

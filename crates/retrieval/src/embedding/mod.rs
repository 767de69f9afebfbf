pub mod ollama;
pub mod openai;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::{info, warn};

use askdesk_core::config::{EmbeddingConfig, LlmConfig, OllamaConfig};

pub use ollama::OllamaEmbedder;
pub use openai::OpenAiEmbedder;
pub use traits::{Embedder, EmbeddingError};

/// Settings shared by every query embedder backend.
#[derive(Debug, Clone)]
pub struct EmbedderSettings {
    pub model: String,
    pub dimensions: usize,
    pub timeout: Duration,
    pub query_prefix: String,
}

impl EmbedderSettings {
    fn http_client(&self) -> Result<Client, EmbeddingError> {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| EmbeddingError::Setup(e.to_string()))
    }

    fn prefixed(&self, query: &str) -> String {
        format!("{}{}", self.query_prefix, query.trim())
    }
}

impl From<&EmbeddingConfig> for EmbedderSettings {
    fn from(cfg: &EmbeddingConfig) -> Self {
        Self {
            model: cfg.model.clone(),
            dimensions: cfg.dimensions as usize,
            timeout: cfg.request_timeout(),
            query_prefix: cfg.query_prefix.clone(),
        }
    }
}

/// Create the query embedder from config. `None` disables dense retrieval.
pub fn create_embedder(
    embedding: &EmbeddingConfig,
    llm: &LlmConfig,
    ollama: &OllamaConfig,
) -> Option<Arc<dyn Embedder>> {
    let settings = EmbedderSettings::from(embedding);
    let built: Result<Arc<dyn Embedder>, EmbeddingError> = match embedding.provider.as_str() {
        "ollama" => OllamaEmbedder::new(&ollama.url, settings).map(|e| Arc::new(e) as Arc<dyn Embedder>),
        "openai" => match &llm.openai_api_key {
            Some(key) => OpenAiEmbedder::new(key.clone(), llm.openai_base_url.as_deref(), settings)
                .map(|e| Arc::new(e) as Arc<dyn Embedder>),
            None => {
                warn!("EMBEDDING_PROVIDER=openai but OPENAI_API_KEY not set, dense retrieval disabled");
                return None;
            }
        },
        other => {
            info!(provider = %other, "query embedder disabled, sparse retrieval only");
            return None;
        }
    };

    match built {
        Ok(embedder) => {
            info!(
                provider = %embedding.provider,
                model = %embedding.model,
                timeout_ms = embedding.request_timeout_ms,
                "query embedder ready"
            );
            Some(embedder)
        }
        Err(e) => {
            warn!(error = %e, "query embedder unavailable, sparse retrieval only");
            None
        }
    }
}

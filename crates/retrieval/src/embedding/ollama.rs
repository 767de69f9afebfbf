use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::traits::{send, Embedder, EmbeddingError};
use super::EmbedderSettings;

/// Query embedder backed by Ollama's `/api/embed`.
pub struct OllamaEmbedder {
    client: Client,
    endpoint: String,
    settings: EmbedderSettings,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, settings: EmbedderSettings) -> Result<Self, EmbeddingError> {
        Ok(Self {
            client: settings.http_client()?,
            endpoint: format!("{}/api/embed", base_url.trim_end_matches('/')),
            settings,
        })
    }

    fn request_body<'a>(&'a self, query: &'a str) -> EmbedRequest<'a> {
        EmbedRequest {
            model: &self.settings.model,
            input: self.settings.prefixed(query),
            truncate: true,
        }
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: String,
    /// Long queries are cut to the model context instead of failing.
    truncate: bool,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

fn parse_response(body: &str) -> Result<Vec<f32>, EmbeddingError> {
    let parsed: EmbedResponse =
        serde_json::from_str(body).map_err(|e| EmbeddingError::Malformed(e.to_string()))?;
    parsed.embeddings.into_iter().next().ok_or(EmbeddingError::Empty)
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn request_embedding(&self, query: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = send(self.client.post(&self.endpoint).json(&self.request_body(query))).await?;
        parse_response(&body)
    }

    fn dimensions(&self) -> usize {
        self.settings.dimensions
    }
}

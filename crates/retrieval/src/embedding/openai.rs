use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::traits::{send, Embedder, EmbeddingError};
use super::EmbedderSettings;

/// Query embedder for OpenAI-compatible `/v1/embeddings` endpoints.
pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    endpoint: String,
    settings: EmbedderSettings,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, base_url: Option<&str>, settings: EmbedderSettings) -> Result<Self, EmbeddingError> {
        let base = base_url.unwrap_or("https://api.openai.com").trim_end_matches('/');
        Ok(Self {
            client: settings.http_client()?,
            api_key,
            endpoint: format!("{base}/v1/embeddings"),
            settings,
        })
    }

    fn request_body<'a>(&'a self, query: &'a str) -> EmbedRequest<'a> {
        // Only the text-embedding-3 family accepts a shortened output width.
        let dimensions = self
            .settings
            .model
            .starts_with("text-embedding-3")
            .then_some(self.settings.dimensions);
        EmbedRequest {
            model: &self.settings.model,
            input: self.settings.prefixed(query),
            encoding_format: "float",
            dimensions,
        }
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: String,
    encoding_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedItem>,
}

#[derive(Deserialize)]
struct EmbedItem {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

fn parse_response(body: &str) -> Result<Vec<f32>, EmbeddingError> {
    let parsed: EmbedResponse =
        serde_json::from_str(body).map_err(|e| EmbeddingError::Malformed(e.to_string()))?;
    parsed
        .data
        .into_iter()
        .min_by_key(|item| item.index)
        .map(|item| item.embedding)
        .ok_or(EmbeddingError::Empty)
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn request_embedding(&self, query: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(query));
        parse_response(&send(request).await?)
    }

    fn dimensions(&self) -> usize {
        self.settings.dimensions
    }
}

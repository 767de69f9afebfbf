use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Timeout, refused connection or similar; the next query may succeed.
    #[error("embedder unreachable: {0}")]
    Unavailable(String),

    #[error("embedder returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed embedding response: {0}")]
    Malformed(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedder returned no vector")]
    Empty,

    #[error("failed to build embedder client: {0}")]
    Setup(String),
}

impl EmbeddingError {
    /// Whether the failure is about the backend's current state rather than
    /// the configuration. Non-transient failures repeat on every query.
    pub fn is_transient(&self) -> bool {
        match self {
            EmbeddingError::Unavailable(_) => true,
            EmbeddingError::Status { status, .. } => matches!(status, 408 | 429) || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            EmbeddingError::Malformed(e.to_string())
        } else {
            EmbeddingError::Unavailable(e.to_string())
        }
    }
}

/// Query-time embedding backend (Ollama, OpenAI).
///
/// Must produce vectors in the same space the offline indexer used for chunks.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One request for one query; no dimension check.
    async fn request_embedding(&self, query: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Dimensionality of the index vectors.
    fn dimensions(&self) -> usize;

    /// Embed a query, rejecting vectors that cannot be compared with the index.
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, EmbeddingError> {
        let vector = self.request_embedding(query).await?;
        check_dimensions(vector, self.dimensions())
    }
}

pub(crate) fn check_dimensions(vector: Vec<f32>, expected: usize) -> Result<Vec<f32>, EmbeddingError> {
    if vector.is_empty() {
        return Err(EmbeddingError::Empty);
    }
    if vector.len() != expected {
        return Err(EmbeddingError::DimensionMismatch { expected, actual: vector.len() });
    }
    Ok(vector)
}

/// Send a prepared request and return the body of a 2xx response.
pub(crate) async fn send(request: reqwest::RequestBuilder) -> Result<String, EmbeddingError> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(EmbeddingError::Status { status: status.as_u16(), body });
    }
    Ok(body)
}

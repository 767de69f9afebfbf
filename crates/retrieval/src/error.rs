use thiserror::Error;

use crate::embedding::EmbeddingError;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid index record at line {line}: {message}")]
    InvalidRecord { line: usize, message: String },

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index search failed: {0}")]
    Search(String),

    #[error("both retrieval signals failed (dense: {dense}; sparse: {sparse})")]
    AllSignalsFailed { dense: String, sparse: String },
}

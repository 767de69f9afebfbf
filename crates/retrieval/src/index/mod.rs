//! Read-only knowledge index primitives consumed by the hybrid retriever.
//!
//! The index is built offline by the ingestion tooling. This crate only
//! reads it: `dense_search` ranks chunks by vector similarity and
//! `sparse_search` ranks them by term-frequency scoring.

mod bm25;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use askdesk_core::KnowledgeChunk;

use crate::error::RetrievalError;

pub use bm25::Bm25Scorer;
pub use memory::InMemoryIndex;

/// A chunk with the raw score from a single signal. Higher is better.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Arc<KnowledgeChunk>,
    pub score: f64,
}

#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    /// Top `k` chunks by embedding similarity, best first.
    async fn dense_search(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, RetrievalError>;

    /// Top `k` chunks by term scoring, best first. Chunks with no matching term are omitted.
    async fn sparse_search(&self, terms: &[String], k: usize) -> Result<Vec<ScoredChunk>, RetrievalError>;

    /// Number of chunks in the index.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

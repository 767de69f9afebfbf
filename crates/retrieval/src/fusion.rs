//! Weighted Reciprocal Rank Fusion of the dense and sparse candidate lists.
//!
//! ```text
//! score(c) = w_dense / (k + rank_dense(c)) + w_sparse / (k + rank_sparse(c))
//! ```
//!
//! Ranks are 1-based; a list the chunk is missing from contributes nothing.
//! Ordering is tiered: chunks found by both signals come before single-signal
//! chunks, then fused score, then the more recently updated source, then
//! chunk id so the output is deterministic.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use askdesk_core::KnowledgeChunk;

use crate::index::ScoredChunk;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FusionWeights {
    pub dense: f64,
    pub sparse: f64,
    /// RRF smoothing constant.
    pub k: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self { dense: 1.0, sparse: 1.0, k: 60.0 }
    }
}

#[derive(Debug, Clone)]
pub struct FusedChunk {
    pub chunk: Arc<KnowledgeChunk>,
    pub score: f64,
    pub dense_rank: Option<usize>,
    pub sparse_rank: Option<usize>,
}

impl FusedChunk {
    /// How many retrieval signals surfaced this chunk.
    pub fn signals(&self) -> usize {
        self.dense_rank.is_some() as usize + self.sparse_rank.is_some() as usize
    }
}

pub fn fuse(dense: &[ScoredChunk], sparse: &[ScoredChunk], weights: &FusionWeights) -> Vec<FusedChunk> {
    let mut by_id: HashMap<&str, FusedChunk> = HashMap::new();

    for (i, hit) in dense.iter().enumerate() {
        let rank = i + 1;
        let entry = by_id
            .entry(hit.chunk.chunk_id.as_str())
            .or_insert_with(|| empty(&hit.chunk));
        if entry.dense_rank.is_none() {
            entry.dense_rank = Some(rank);
            entry.score += weights.dense / (weights.k + rank as f64);
        }
    }

    for (i, hit) in sparse.iter().enumerate() {
        let rank = i + 1;
        let entry = by_id
            .entry(hit.chunk.chunk_id.as_str())
            .or_insert_with(|| empty(&hit.chunk));
        if entry.sparse_rank.is_none() {
            entry.sparse_rank = Some(rank);
            entry.score += weights.sparse / (weights.k + rank as f64);
        }
    }

    let mut fused: Vec<FusedChunk> = by_id.into_values().collect();
    fused.sort_by(compare);
    fused
}

fn empty(chunk: &Arc<KnowledgeChunk>) -> FusedChunk {
    FusedChunk {
        chunk: Arc::clone(chunk),
        score: 0.0,
        dense_rank: None,
        sparse_rank: None,
    }
}

fn compare(a: &FusedChunk, b: &FusedChunk) -> Ordering {
    b.signals()
        .cmp(&a.signals())
        .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
        .then_with(|| recency(b).cmp(&recency(a)))
        .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
}

/// Undated sources sort after dated ones.
fn recency(c: &FusedChunk) -> Option<i64> {
    c.chunk.source_updated_at.map(|t| t.timestamp_millis())
}

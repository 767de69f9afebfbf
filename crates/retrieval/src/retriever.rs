use std::sync::Arc;

use tracing::{debug, error, warn};

use askdesk_core::config::RetrievalConfig;
use askdesk_core::text::extract_terms;
use askdesk_core::KnowledgeChunk;

use crate::budget::apply_budget;
use crate::embedding::Embedder;
use crate::error::RetrievalError;
use crate::fusion::{fuse, FusionWeights};
use crate::index::{KnowledgeIndex, ScoredChunk};

#[derive(Debug, Clone, Copy)]
pub struct RetrieverSettings {
    /// Candidates pulled from each signal before fusion.
    pub candidates: usize,
    pub weights: FusionWeights,
    pub max_context_tokens: usize,
}

impl From<&RetrievalConfig> for RetrieverSettings {
    fn from(cfg: &RetrievalConfig) -> Self {
        Self {
            candidates: cfg.candidates,
            weights: FusionWeights {
                dense: cfg.dense_weight,
                sparse: cfg.sparse_weight,
                k: cfg.rrf_k,
            },
            max_context_tokens: cfg.max_context_tokens,
        }
    }
}

impl Default for RetrieverSettings {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    /// Context chunks in fused-rank order, within the token budget.
    pub chunks: Vec<Arc<KnowledgeChunk>>,
    pub dense_candidates: usize,
    pub sparse_candidates: usize,
    pub tokens_used: usize,
    pub dropped_for_budget: usize,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Dense + sparse retrieval over a read-only index, fused and budgeted.
///
/// Stateless between calls: every `retrieve` recomputes both candidate lists.
pub struct HybridRetriever {
    index: Arc<dyn KnowledgeIndex>,
    embedder: Option<Arc<dyn Embedder>>,
    settings: RetrieverSettings,
}

impl HybridRetriever {
    pub fn new(
        index: Arc<dyn KnowledgeIndex>,
        embedder: Option<Arc<dyn Embedder>>,
        settings: RetrieverSettings,
    ) -> Self {
        Self { index, embedder, settings }
    }

    pub fn settings(&self) -> &RetrieverSettings {
        &self.settings
    }

    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<RetrievalResult, RetrievalError> {
        let terms = extract_terms(query);
        let k = self.settings.candidates.max(top_k);

        let (dense, sparse) = tokio::join!(self.dense(query, k), self.index.sparse_search(&terms, k));

        let (dense, sparse) = match (dense, sparse) {
            (Err(d), Err(s)) => {
                return Err(RetrievalError::AllSignalsFailed {
                    dense: d.to_string(),
                    sparse: s.to_string(),
                })
            }
            (Err(e), Ok(s)) => {
                log_dense_failure(&e);
                (Vec::new(), s)
            }
            (Ok(d), Err(e)) => {
                warn!(error = %e, "sparse retrieval failed, using dense only");
                (d, Vec::new())
            }
            (Ok(d), Ok(s)) => (d, s),
        };

        let mut fused = fuse(&dense, &sparse, &self.settings.weights);
        fused.truncate(top_k);
        let budgeted = apply_budget(fused, self.settings.max_context_tokens);

        debug!(
            terms = terms.len(),
            dense = dense.len(),
            sparse = sparse.len(),
            kept = budgeted.kept.len(),
            tokens = budgeted.tokens_used,
            dropped = budgeted.dropped,
            "retrieval complete"
        );

        Ok(RetrievalResult {
            chunks: budgeted.kept.into_iter().map(|f| f.chunk).collect(),
            dense_candidates: dense.len(),
            sparse_candidates: sparse.len(),
            tokens_used: budgeted.tokens_used,
            dropped_for_budget: budgeted.dropped,
        })
    }

    async fn dense(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let Some(embedder) = &self.embedder else {
            return Ok(Vec::new());
        };
        let vector = embedder.embed_query(query).await?;
        self.index.dense_search(&vector, k).await
    }
}

/// Transient embedder trouble is expected now and then; anything else will
/// fail every query until the configuration is fixed.
fn log_dense_failure(e: &RetrievalError) {
    match e {
        RetrievalError::Embedding(inner) if inner.is_transient() => {
            warn!(error = %e, "query embedder unavailable, using sparse only")
        }
        RetrievalError::Embedding(_) => {
            error!(error = %e, "query embedder misconfigured, using sparse only")
        }
        _ => warn!(error = %e, "dense retrieval failed, using sparse only"),
    }
}

pub mod budget;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod index;
pub mod retriever;

pub use budget::{apply_budget, BudgetOutcome};
pub use embedding::{create_embedder, Embedder, EmbeddingError};
pub use error::RetrievalError;
pub use fusion::{fuse, FusedChunk, FusionWeights};
pub use index::{InMemoryIndex, KnowledgeIndex, ScoredChunk};
pub use retriever::{HybridRetriever, RetrievalResult, RetrieverSettings};

use std::cmp::Ordering;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use askdesk_core::KnowledgeChunk;

use super::bm25::Bm25Scorer;
use super::{KnowledgeIndex, ScoredChunk};
use crate::error::RetrievalError;

/// Knowledge index held fully in memory, loaded from a JSONL export
/// (one `KnowledgeChunk` per line).
pub struct InMemoryIndex {
    chunks: Vec<Arc<KnowledgeChunk>>,
    bm25: Bm25Scorer,
}

impl InMemoryIndex {
    pub fn from_chunks(chunks: Vec<KnowledgeChunk>) -> Self {
        let bm25 = Bm25Scorer::build(&chunks);
        Self {
            chunks: chunks.into_iter().map(Arc::new).collect(),
            bm25,
        }
    }

    /// Load an index export. A missing file yields an empty index.
    pub fn load(path: &Path) -> Result<Self, RetrievalError> {
        if !path.exists() {
            warn!(path = %path.display(), "knowledge index not found, starting empty");
            return Ok(Self::from_chunks(Vec::new()));
        }

        let file = std::fs::File::open(path)?;
        let mut chunks = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let chunk: KnowledgeChunk =
                serde_json::from_str(&line).map_err(|e| RetrievalError::InvalidRecord {
                    line: i + 1,
                    message: e.to_string(),
                })?;
            chunks.push(chunk);
        }

        let with_vectors = chunks.iter().filter(|c| !c.dense_vector.is_empty()).count();
        info!(
            path = %path.display(),
            chunks = chunks.len(),
            with_vectors,
            "knowledge index loaded"
        );
        Ok(Self::from_chunks(chunks))
    }

    pub fn chunks(&self) -> &[Arc<KnowledgeChunk>] {
        &self.chunks
    }
}

#[async_trait]
impl KnowledgeIndex for InMemoryIndex {
    async fn dense_search(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let scored = self
            .chunks
            .iter()
            .filter(|c| c.dense_vector.len() == vector.len())
            .filter_map(|c| {
                cosine_similarity(vector, &c.dense_vector).map(|score| ScoredChunk {
                    chunk: Arc::clone(c),
                    score,
                })
            })
            .collect();
        Ok(top_k(scored, k))
    }

    async fn sparse_search(&self, terms: &[String], k: usize) -> Result<Vec<ScoredChunk>, RetrievalError> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let scored = self
            .chunks
            .iter()
            .map(|c| ScoredChunk {
                chunk: Arc::clone(c),
                score: self.bm25.score(terms, c),
            })
            .filter(|s| s.score > 0.0)
            .collect();
        Ok(top_k(scored, k))
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }
}

/// `None` for zero-length vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

fn top_k(mut scored: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
    });
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn chunk(id: &str, vector: Vec<f32>, terms: &[&str]) -> KnowledgeChunk {
        KnowledgeChunk {
            chunk_id: id.into(),
            text: format!("text of {id}"),
            dense_vector: vector,
            sparse_terms: terms.iter().map(|t| (t.to_string(), 1)).collect::<HashMap<_, _>>(),
            source_doc: "handbook.pdf".into(),
            offset: 0,
            source_updated_at: None,
            token_count: 10,
        }
    }

    #[tokio::test]
    async fn dense_search_ranks_by_cosine() {
        let index = InMemoryIndex::from_chunks(vec![
            chunk("far", vec![0.0, 1.0], &[]),
            chunk("near", vec![1.0, 0.1], &[]),
            chunk("wrong-dims", vec![1.0, 0.0, 0.0], &[]),
        ]);
        let hits = index.dense_search(&[1.0, 0.0], 10).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "far"]);
    }

    #[tokio::test]
    async fn sparse_search_omits_non_matching() {
        let index = InMemoryIndex::from_chunks(vec![
            chunk("a", vec![], &["tuition", "deadline"]),
            chunk("b", vec![], &["parking"]),
        ]);
        let hits = index.sparse_search(&["tuition".into()], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.chunk_id, "a");
        assert!(index.sparse_search(&[], 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn top_k_truncates() {
        let index = InMemoryIndex::from_chunks(
            (0..5).map(|i| chunk(&format!("c{i}"), vec![1.0, i as f32], &[])).collect(),
        );
        assert_eq!(index.dense_search(&[1.0, 1.0], 3).await.unwrap().len(), 3);
    }

    #[test]
    fn load_reads_jsonl_and_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for c in [chunk("a", vec![1.0], &["x"]), chunk("b", vec![0.5], &["y"])] {
            writeln!(file, "{}", serde_json::to_string(&c).unwrap()).unwrap();
            writeln!(file).unwrap();
        }
        let index = InMemoryIndex::load(file.path()).unwrap();
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn load_reports_bad_line_number() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", serde_json::to_string(&chunk("a", vec![], &[])).unwrap()).unwrap();
        writeln!(file, "not json").unwrap();
        match InMemoryIndex::load(file.path()) {
            Err(RetrievalError::InvalidRecord { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected InvalidRecord, got {:?}", other.map(|i| i.len())),
        }
    }

    #[test]
    fn missing_file_is_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let index = InMemoryIndex::load(&dir.path().join("nope.jsonl")).unwrap();
        assert!(index.is_empty());
    }
}

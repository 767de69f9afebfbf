//! BM25 over the precomputed `sparse_terms` of each chunk.
//!
//! ```text
//! score(q, d) = Σ IDF(t) * (TF(t,d) * (k1 + 1)) / (TF(t,d) + k1 * (1 - b + b * |d|/avgdl))
//! IDF(t)      = ln((N - df(t) + 0.5) / (df(t) + 0.5) + 1)
//! ```

use std::collections::HashMap;

use askdesk_core::KnowledgeChunk;

const K1: f64 = 1.2;
const B: f64 = 0.75;

pub struct Bm25Scorer {
    num_docs: usize,
    avg_doc_len: f64,
    doc_freqs: HashMap<String, usize>,
}

impl Bm25Scorer {
    pub fn build<'a>(chunks: impl IntoIterator<Item = &'a KnowledgeChunk>) -> Self {
        let mut num_docs = 0usize;
        let mut total_len = 0u64;
        let mut doc_freqs: HashMap<String, usize> = HashMap::new();

        for chunk in chunks {
            num_docs += 1;
            total_len += doc_len(chunk);
            for term in chunk.sparse_terms.keys() {
                *doc_freqs.entry(term.clone()).or_default() += 1;
            }
        }

        let avg_doc_len = if num_docs == 0 {
            0.0
        } else {
            total_len as f64 / num_docs as f64
        };

        Self { num_docs, avg_doc_len, doc_freqs }
    }

    pub fn idf(&self, term: &str) -> f64 {
        let n = self.num_docs as f64;
        let df = self.doc_freqs.get(term).copied().unwrap_or(0) as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Zero when no query term occurs in the chunk.
    pub fn score(&self, terms: &[String], chunk: &KnowledgeChunk) -> f64 {
        if self.avg_doc_len == 0.0 {
            return 0.0;
        }
        let len_norm = 1.0 - B + B * (doc_len(chunk) as f64 / self.avg_doc_len);
        terms
            .iter()
            .filter_map(|t| chunk.sparse_terms.get(t).map(|tf| (t, *tf as f64)))
            .map(|(t, tf)| self.idf(t) * (tf * (K1 + 1.0)) / (tf + K1 * len_norm))
            .sum()
    }
}

fn doc_len(chunk: &KnowledgeChunk) -> u64 {
    chunk.sparse_terms.values().map(|&n| n as u64).sum()
}

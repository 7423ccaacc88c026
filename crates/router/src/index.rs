//! Search backend abstractions.
//!
//! The retriever only talks to these traits; ANN search, lexical scoring and
//! cross-encoder reranking live behind them.

use async_trait::async_trait;
use enclave_core::AppResult;

/// A hit from dense search. `distance` is the backend's raw cosine distance
/// in [0, 2]; lower is closer.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub document_id: String,
    pub title: String,
    pub scope: String,
    pub content: String,
    pub distance: f32,
}

/// A hit from lexical search. `rank` is 0-based; 0 is the best match.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    pub document_id: String,
    pub title: String,
    pub scope: String,
    pub content: String,
    pub rank: usize,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Top `k` chunks closest to `query`, restricted to `scopes`.
    async fn search(&self, query: &[f32], k: usize, scopes: &[String]) -> AppResult<Vec<VectorHit>>;
}

#[async_trait]
pub trait LexicalIndex: Send + Sync {
    /// Top `k` chunks for `query` across every scope, best first.
    async fn search(&self, query: &str, k: usize) -> AppResult<Vec<LexicalHit>>;
}

#[async_trait]
pub trait Reranker: Send + Sync {
    /// One relevance score per document, aligned with `documents`.
    async fn rerank(&self, query: &str, documents: &[String]) -> AppResult<Vec<f32>>;
}

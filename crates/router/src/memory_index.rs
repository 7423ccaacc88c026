//! In-process search backends over a loaded corpus.
//!
//! Brute-force cosine search and a term-overlap ranker. Enough for a local
//! corpus of a few thousand chunks; larger deployments plug real services
//! in behind [`VectorIndex`] and [`LexicalIndex`].

use std::cmp::Ordering;
use std::collections::HashSet;

use async_trait::async_trait;
use enclave_core::{AppError, AppResult};
use unicode_segmentation::UnicodeSegmentation;

use crate::corpus::CorpusChunk;
use crate::embeddings::EmbeddingProvider;
use crate::index::{LexicalHit, LexicalIndex, VectorHit, VectorIndex};

#[derive(Debug, Clone)]
struct EmbeddedChunk {
    chunk: CorpusChunk,
    embedding: Vec<f32>,
}

#[derive(Debug, Default)]
pub struct MemoryVectorIndex {
    entries: Vec<EmbeddedChunk>,
}

impl MemoryVectorIndex {
    /// Embed `chunks` with `embedder` and index them.
    pub async fn build(chunks: Vec<CorpusChunk>, embedder: &dyn EmbeddingProvider) -> AppResult<Self> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = embedder.embed_batch(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(AppError::Retrieval(format!(
                "Embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        let entries = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
            .collect();
        Ok(Self { entries })
    }

    pub fn insert(&mut self, chunk: CorpusChunk, embedding: Vec<f32>) {
        self.entries.push(EmbeddedChunk { chunk, embedding });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn search(&self, query: &[f32], k: usize, scopes: &[String]) -> AppResult<Vec<VectorHit>> {
        let mut hits: Vec<VectorHit> = self
            .entries
            .iter()
            .filter(|e| scopes.iter().any(|s| *s == e.chunk.scope))
            .map(|e| VectorHit {
                document_id: e.chunk.document_id.clone(),
                title: e.chunk.title.clone(),
                scope: e.chunk.scope.clone(),
                content: e.chunk.content.clone(),
                distance: 1.0 - cosine_similarity(query, &e.embedding),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.document_id.cmp(&b.document_id))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

#[derive(Debug)]
struct TermEntry {
    chunk: CorpusChunk,
    terms: HashSet<String>,
}

/// Ranks chunks by how many distinct query terms they contain.
#[derive(Debug, Default)]
pub struct MemoryLexicalIndex {
    entries: Vec<TermEntry>,
}

impl MemoryLexicalIndex {
    pub fn new(chunks: Vec<CorpusChunk>) -> Self {
        let entries = chunks
            .into_iter()
            .map(|chunk| TermEntry {
                terms: terms(&chunk.content)
                    .chain(terms(&chunk.title))
                    .collect(),
                chunk,
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl LexicalIndex for MemoryLexicalIndex {
    async fn search(&self, query: &str, k: usize) -> AppResult<Vec<LexicalHit>> {
        let query_terms: HashSet<String> = terms(query).collect();
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut matches: Vec<(usize, &TermEntry)> = self
            .entries
            .iter()
            .map(|e| (query_terms.iter().filter(|t| e.terms.contains(*t)).count(), e))
            .filter(|(overlap, _)| *overlap > 0)
            .collect();

        matches.sort_by(|(a_overlap, a), (b_overlap, b)| {
            b_overlap
                .cmp(a_overlap)
                .then_with(|| a.chunk.document_id.cmp(&b.chunk.document_id))
        });
        matches.truncate(k);

        Ok(matches
            .into_iter()
            .enumerate()
            .map(|(rank, (_, e))| LexicalHit {
                document_id: e.chunk.document_id.clone(),
                title: e.chunk.title.clone(),
                scope: e.chunk.scope.clone(),
                content: e.chunk.content.clone(),
                rank,
            })
            .collect())
    }
}

fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.unicode_words()
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() > 2 || !w.is_ascii())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::providers::mock::MockProvider;

    fn chunk(id: &str, scope: &str, content: &str) -> CorpusChunk {
        CorpusChunk {
            document_id: id.to_string(),
            title: format!("{} doc", id),
            scope: scope.to_string(),
            content: content.to_string(),
        }
    }

    fn corpus() -> Vec<CorpusChunk> {
        vec![
            chunk("d1", "hr", "Annual leave policy: employees receive fifteen days of paid leave."),
            chunk("d2", "finance", "Expense reimbursement requires receipts within thirty days."),
            chunk("d3", "public", "The office cafeteria opens at eight and serves breakfast."),
        ]
    }

    #[tokio::test]
    async fn test_vector_search_respects_scope_filter() {
        let embedder = MockProvider::new(128);
        let index = MemoryVectorIndex::build(corpus(), &embedder).await.unwrap();
        assert_eq!(index.len(), 3);

        let query = embedder.embed("paid annual leave").await.unwrap();
        let scopes = vec!["hr".to_string(), "public".to_string()];
        let hits = index.search(&query, 5, &scopes).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document_id, "d1");
        assert!(hits.iter().all(|h| h.scope != "finance"));
        assert!(hits.iter().all(|h| (0.0..=2.0).contains(&h.distance)));
    }

    #[tokio::test]
    async fn test_vector_search_empty_scopes() {
        let embedder = MockProvider::new(64);
        let index = MemoryVectorIndex::build(corpus(), &embedder).await.unwrap();
        let query = embedder.embed("leave").await.unwrap();
        assert!(index.search(&query, 5, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lexical_ranks_by_overlap() {
        let index = MemoryLexicalIndex::new(corpus());
        let hits = index.search("reimbursement receipts for leave", 10).await.unwrap();

        assert_eq!(hits[0].document_id, "d2");
        assert_eq!(hits[0].rank, 0);
        assert_eq!(hits[1].document_id, "d1");
        assert_eq!(hits[1].rank, 1);
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_lexical_no_terms() {
        let index = MemoryLexicalIndex::new(corpus());
        assert!(index.search("a an ?", 10).await.unwrap().is_empty());
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}

//! Two-tier hybrid retrieval over the scopes a strategy names.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use enclave_core::{AppError, AppResult};

use crate::config::{RetrievalSettings, TimeoutSettings};
use crate::embeddings::EmbeddingProvider;
use crate::index::{LexicalIndex, Reranker, VectorIndex};
use crate::rephrase::QueryRephraser;
use crate::stage::StageError;
use crate::types::{CandidateDocument, RetrievalStrategy};

/// Map a cosine distance in [0, 2] to a relevance score in [0, 1].
pub fn distance_to_score(distance: f32) -> f32 {
    if !distance.is_finite() {
        return 0.0;
    }
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

/// Score of the hit at 0-based position `rank` in a lexical ranking.
pub fn rank_to_score(rank: usize) -> f32 {
    1.0 / (1.0 + rank as f32)
}

pub struct HybridRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    vector: Arc<dyn VectorIndex>,
    lexical: Option<Arc<dyn LexicalIndex>>,
    reranker: Option<Arc<dyn Reranker>>,
    rephraser: Option<QueryRephraser>,
    settings: RetrievalSettings,
    timeouts: TimeoutSettings,
}

impl HybridRetriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vector: Arc<dyn VectorIndex>,
        settings: RetrievalSettings,
        timeouts: TimeoutSettings,
    ) -> Self {
        Self {
            embedder,
            vector,
            lexical: None,
            reranker: None,
            rephraser: None,
            settings,
            timeouts,
        }
    }

    /// Used only while `lexical_enabled` is set.
    pub fn with_lexical(mut self, lexical: Arc<dyn LexicalIndex>) -> Self {
        self.lexical = Some(lexical);
        self
    }

    /// Used only while `rerank_enabled` is set.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Used only while `rephrase_enabled` is set.
    pub fn with_rephraser(mut self, rephraser: QueryRephraser) -> Self {
        self.rephraser = Some(rephraser);
        self
    }

    fn lexical_index(&self) -> Option<&Arc<dyn LexicalIndex>> {
        self.lexical.as_ref().filter(|_| self.settings.lexical_enabled)
    }

    /// Search the primary scopes, then the secondary scopes for whatever
    /// slots are left.
    ///
    /// Candidate scores are in [0, 1]. Fails recoverably only when no search
    /// channel could run for the primary tier; the default is no candidates.
    pub async fn retrieve(
        &self,
        query: &str,
        strategy: &RetrievalStrategy,
    ) -> Result<Vec<CandidateDocument>, StageError> {
        let limit = strategy.max_results;
        if limit == 0 || strategy.all_scopes().next().is_none() {
            tracing::debug!("nothing to search");
            return Ok(Vec::new());
        }

        let search_query = match self.rephraser {
            Some(ref rephraser) if self.settings.rephrase_enabled => rephraser.rephrase(query).await,
            _ => query.to_string(),
        };

        let query_vector = match self.embed(&search_query).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, dense search skipped");
                if self.lexical_index().is_none() {
                    return Err(StageError::Recoverable(e));
                }
                None
            }
        };

        let mut candidates = if strategy.primary_scopes.is_empty() {
            Vec::new()
        } else {
            self.search_tier(&search_query, query_vector.as_deref(), &strategy.primary_scopes, limit)
                .await
                .map_err(StageError::Recoverable)?
        };
        let primary_count = candidates.len();

        if candidates.len() < limit && !strategy.secondary_scopes.is_empty() {
            let remaining = limit - candidates.len();
            let secondary = self
                .search_tier(&search_query, query_vector.as_deref(), &strategy.secondary_scopes, remaining)
                .await;
            match secondary {
                Ok(found) => {
                    let seen: HashSet<String> =
                        candidates.iter().map(|c| c.document_id.clone()).collect();
                    candidates.extend(
                        found
                            .into_iter()
                            .filter(|c| !seen.contains(&c.document_id))
                            .take(remaining),
                    );
                }
                Err(e) if strategy.primary_scopes.is_empty() => {
                    return Err(StageError::Recoverable(e));
                }
                Err(e) => tracing::warn!(error = %e, "secondary tier failed, keeping primary results"),
            }
        }

        if let Some(reranker) = self.reranker.as_ref().filter(|_| self.settings.rerank_enabled) {
            self.rerank(reranker.as_ref(), &search_query, &mut candidates).await;
        }

        tracing::info!(
            primary = primary_count,
            secondary = candidates.len() - primary_count,
            "retrieval finished"
        );
        Ok(candidates)
    }

    async fn embed(&self, query: &str) -> AppResult<Vec<f32>> {
        let timeout = self.timeouts.embed();
        tokio::time::timeout(timeout, self.embedder.embed(query))
            .await
            .map_err(|_| AppError::timeout("query embedding", timeout))?
    }

    /// Dense and lexical search over one tier, fused and deduplicated, best
    /// first, at most `k` entries. Errors only if every channel failed.
    async fn search_tier(
        &self,
        query: &str,
        query_vector: Option<&[f32]>,
        scopes: &[String],
        k: usize,
    ) -> AppResult<Vec<CandidateDocument>> {
        let search_timeout = self.timeouts.search();

        let dense = async {
            let vector = query_vector?;
            let result = tokio::time::timeout(search_timeout, self.vector.search(vector, k, scopes))
                .await
                .map_err(|_| AppError::timeout("vector search", search_timeout))
                .and_then(|r| r);
            Some(result)
        };
        let lexical = async {
            let index = self.lexical_index()?;
            let wanted = k.saturating_mul(self.settings.lexical_oversample.max(1));
            let result = tokio::time::timeout(search_timeout, index.search(query, wanted))
                .await
                .map_err(|_| AppError::timeout("lexical search", search_timeout))
                .and_then(|r| r);
            Some(result)
        };
        let (dense, lexical) = tokio::join!(dense, lexical);

        let mut fused: HashMap<String, Fused> = HashMap::new();
        let mut last_error = None;

        let dense_ok = match dense {
            Some(Ok(hits)) => {
                for hit in hits.into_iter().filter(|h| scopes.contains(&h.scope)) {
                    let score = distance_to_score(hit.distance);
                    let entry = fused.entry(hit.document_id.clone()).or_insert_with(|| {
                        Fused::new(hit.document_id, hit.title, hit.scope, hit.content)
                    });
                    entry.dense = Some(entry.dense.map_or(score, |s| s.max(score)));
                }
                true
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "vector search failed");
                last_error = Some(e);
                false
            }
            None => false,
        };

        let lexical_ok = match lexical {
            Some(Ok(hits)) => {
                let in_scope = hits.into_iter().filter(|h| scopes.contains(&h.scope));
                for (rank, hit) in in_scope.enumerate() {
                    let score = rank_to_score(rank);
                    let entry = fused.entry(hit.document_id.clone()).or_insert_with(|| {
                        Fused::new(hit.document_id, hit.title, hit.scope, hit.content)
                    });
                    entry.lexical = Some(entry.lexical.map_or(score, |s| s.max(score)));
                }
                true
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "lexical search failed");
                last_error = Some(e);
                false
            }
            None => false,
        };

        if !dense_ok && !lexical_ok {
            return Err(last_error.unwrap_or_else(|| {
                AppError::Retrieval("no search channel available".to_string())
            }));
        }

        let (w_dense, w_lexical) = match (dense_ok, lexical_ok) {
            (true, true) => self.settings.normalized_weights(),
            (true, false) => (1.0, 0.0),
            _ => (0.0, 1.0),
        };

        let mut candidates: Vec<CandidateDocument> = fused
            .into_values()
            .map(|f| {
                let score = w_dense * f.dense.unwrap_or(0.0) + w_lexical * f.lexical.unwrap_or(0.0);
                CandidateDocument {
                    document_id: f.document_id,
                    title: f.title,
                    scope: f.scope,
                    content: f.content,
                    score: score.clamp(0.0, 1.0),
                }
            })
            .collect();
        sort_candidates(&mut candidates);
        candidates.truncate(k);

        tracing::debug!(
            scopes = ?scopes,
            dense = dense_ok,
            lexical = lexical_ok,
            found = candidates.len(),
            "tier searched"
        );
        Ok(candidates)
    }

    /// Replace scores with reranker scores and reorder. Any failure keeps
    /// the fused order.
    async fn rerank(&self, reranker: &dyn Reranker, query: &str, candidates: &mut [CandidateDocument]) {
        if candidates.len() < 2 {
            return;
        }
        let documents: Vec<String> = candidates.iter().map(|c| c.content.clone()).collect();
        let timeout = self.timeouts.rerank();

        let scores = match tokio::time::timeout(timeout, reranker.rerank(query, &documents)).await {
            Ok(Ok(scores)) => scores,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "rerank failed, keeping fused order");
                return;
            }
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "rerank timed out, keeping fused order");
                return;
            }
        };

        if scores.len() != candidates.len() || scores.iter().any(|s| !s.is_finite()) {
            tracing::warn!(
                expected = candidates.len(),
                got = scores.len(),
                "rerank returned unusable scores, keeping fused order"
            );
            return;
        }

        for (candidate, score) in candidates.iter_mut().zip(scores) {
            candidate.score = score.clamp(0.0, 1.0);
        }
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    }
}

struct Fused {
    document_id: String,
    title: String,
    scope: String,
    content: String,
    dense: Option<f32>,
    lexical: Option<f32>,
}

impl Fused {
    fn new(document_id: String, title: String, scope: String, content: String) -> Self {
        Self {
            document_id,
            title,
            scope,
            content,
            dense: None,
            lexical: None,
        }
    }
}

/// Best score first; ties broken by document id so results are stable.
fn sort_candidates(candidates: &mut [CandidateDocument]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{LexicalHit, VectorHit};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug)]
    struct FixedEmbedder {
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn provider_name(&self) -> &str {
            "fixed"
        }
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dimensions(&self) -> usize {
            2
        }
        async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            if self.fail {
                return Err(AppError::Retrieval("embedder down".into()));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    /// Returns canned hits per scope and records every scope filter it saw.
    struct CannedVectors {
        hits: Vec<VectorHit>,
        fail: bool,
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl VectorIndex for CannedVectors {
        async fn search(&self, _query: &[f32], k: usize, scopes: &[String]) -> AppResult<Vec<VectorHit>> {
            self.calls.lock().unwrap().push(scopes.to_vec());
            if self.fail {
                return Err(AppError::Retrieval("vector store down".into()));
            }
            let mut hits: Vec<VectorHit> =
                self.hits.iter().filter(|h| scopes.contains(&h.scope)).cloned().collect();
            hits.truncate(k);
            Ok(hits)
        }
    }

    struct CannedLexical {
        hits: Vec<LexicalHit>,
        fail: bool,
    }

    #[async_trait]
    impl LexicalIndex for CannedLexical {
        async fn search(&self, _query: &str, k: usize) -> AppResult<Vec<LexicalHit>> {
            if self.fail {
                return Err(AppError::Retrieval("lexical down".into()));
            }
            Ok(self.hits.iter().take(k).cloned().collect())
        }
    }

    struct ScriptedReranker {
        scores: AppResult<Vec<f32>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Reranker for ScriptedReranker {
        async fn rerank(&self, _query: &str, _documents: &[String]) -> AppResult<Vec<f32>> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            match &self.scores {
                Ok(s) => Ok(s.clone()),
                Err(_) => Err(AppError::Retrieval("reranker down".into())),
            }
        }
    }

    fn vhit(id: &str, scope: &str, distance: f32) -> VectorHit {
        VectorHit {
            document_id: id.into(),
            title: id.into(),
            scope: scope.into(),
            content: format!("content of {}", id),
            distance,
        }
    }

    fn lhit(id: &str, scope: &str, rank: usize) -> LexicalHit {
        LexicalHit {
            document_id: id.into(),
            title: id.into(),
            scope: scope.into(),
            content: format!("content of {}", id),
            rank,
        }
    }

    fn strategy(primary: &[&str], secondary: &[&str], max_results: usize) -> RetrievalStrategy {
        RetrievalStrategy {
            primary_scopes: primary.iter().map(|s| s.to_string()).collect(),
            secondary_scopes: secondary.iter().map(|s| s.to_string()).collect(),
            max_results,
            relevance_threshold: 0.2,
            detected_scope: None,
            has_permission: true,
            reasoning: String::new(),
        }
    }

    fn settings(lexical: bool) -> RetrievalSettings {
        RetrievalSettings {
            lexical_enabled: lexical,
            rerank_enabled: true,
            ..RetrievalSettings::default()
        }
    }

    fn vectors(hits: Vec<VectorHit>, fail: bool) -> Arc<CannedVectors> {
        Arc::new(CannedVectors {
            hits,
            fail,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn retriever(embed_fail: bool, vectors: Arc<CannedVectors>, lexical: Option<CannedLexical>) -> HybridRetriever {
        let mut r = HybridRetriever::new(
            Arc::new(FixedEmbedder { fail: embed_fail }),
            vectors,
            settings(lexical.is_some()),
            TimeoutSettings::default(),
        );
        if let Some(l) = lexical {
            r = r.with_lexical(Arc::new(l));
        }
        r
    }

    #[test]
    fn test_score_mappings() {
        assert_eq!(distance_to_score(0.0), 1.0);
        assert_eq!(distance_to_score(1.0), 0.5);
        assert_eq!(distance_to_score(2.0), 0.0);
        assert_eq!(distance_to_score(3.0), 0.0);
        assert_eq!(distance_to_score(-0.5), 1.0);
        assert_eq!(distance_to_score(f32::NAN), 0.0);
        assert_eq!(rank_to_score(0), 1.0);
        assert_eq!(rank_to_score(1), 0.5);
    }

    #[tokio::test]
    async fn test_primary_tier_fills_all_slots() {
        let v = vectors(
            vec![vhit("h1", "hr", 0.2), vhit("h2", "hr", 0.4), vhit("p1", "public", 0.1)],
            false,
        );
        let r = retriever(false, v.clone(), None);
        let docs = r.retrieve("q", &strategy(&["hr"], &["public"], 2)).await.unwrap();

        assert_eq!(docs.iter().map(|d| d.document_id.as_str()).collect::<Vec<_>>(), vec!["h1", "h2"]);
        assert_eq!(docs[0].score, 0.9);
        assert_eq!(v.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_secondary_tier_fills_remaining_slots() {
        let v = vectors(
            vec![vhit("h1", "hr", 0.2), vhit("p1", "public", 0.1), vhit("p2", "public", 0.3), vhit("p3", "public", 0.5)],
            false,
        );
        let r = retriever(false, v.clone(), None);
        let docs = r.retrieve("q", &strategy(&["hr"], &["public"], 3)).await.unwrap();

        let ids: Vec<&str> = docs.iter().map(|d| d.document_id.as_str()).collect();
        assert_eq!(ids, vec!["h1", "p1", "p2"]);
        let calls = v.calls.lock().unwrap();
        assert_eq!(calls[0], vec!["hr"]);
        assert_eq!(calls[1], vec!["public"]);
    }

    #[tokio::test]
    async fn test_fusion_weights_and_dedup() {
        let v = vectors(vec![vhit("a", "hr", 0.0), vhit("b", "hr", 1.0)], false);
        let lexical = CannedLexical {
            hits: vec![lhit("b", "hr", 0), lhit("x", "finance", 1), lhit("a", "hr", 2)],
            fail: false,
        };
        let r = retriever(false, v, Some(lexical));
        let docs = r.retrieve("q", &strategy(&["hr"], &[], 5)).await.unwrap();

        assert_eq!(docs.len(), 2, "out-of-scope lexical hit must be dropped");
        // a: 0.7 * 1.0 + 0.3 * 0.5 (second in-scope lexical hit)
        assert_eq!(docs[0].document_id, "a");
        assert!((docs[0].score - 0.85).abs() < 1e-6);
        // b: 0.7 * 0.5 + 0.3 * 1.0
        assert!((docs[1].score - 0.65).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_vector_down_degrades_to_lexical() {
        let v = vectors(Vec::new(), true);
        let lexical = CannedLexical {
            hits: vec![lhit("a", "hr", 0), lhit("b", "hr", 1)],
            fail: false,
        };
        let r = retriever(false, v, Some(lexical));
        let docs = r.retrieve("q", &strategy(&["hr"], &[], 5)).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].score, 1.0);
    }

    #[tokio::test]
    async fn test_all_channels_down_is_recoverable() {
        let v = vectors(Vec::new(), true);
        let lexical = CannedLexical {
            hits: Vec::new(),
            fail: true,
        };
        let r = retriever(false, v, Some(lexical));
        let err = r.retrieve("q", &strategy(&["hr"], &["public"], 5)).await.unwrap_err();
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_embedder_down_without_lexical_is_recoverable() {
        let r = retriever(true, vectors(vec![vhit("a", "hr", 0.1)], false), None);
        let err = r.retrieve("q", &strategy(&["hr"], &[], 5)).await.unwrap_err();
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_no_scopes_searches_nothing() {
        let v = vectors(vec![vhit("a", "hr", 0.1)], false);
        let r = retriever(false, v.clone(), None);
        assert!(r.retrieve("q", &strategy(&[], &[], 5)).await.unwrap().is_empty());
        assert!(v.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rerank_reorders() {
        let v = vectors(vec![vhit("a", "hr", 0.2), vhit("b", "hr", 0.4)], false);
        let reranker = Arc::new(ScriptedReranker {
            scores: Ok(vec![0.1, 1.4]),
            calls: AtomicUsize::new(0),
        });
        let r = retriever(false, v, None).with_reranker(reranker.clone());
        let docs = r.retrieve("q", &strategy(&["hr"], &[], 5)).await.unwrap();

        assert_eq!(docs[0].document_id, "b");
        assert_eq!(docs[0].score, 1.0);
        assert_eq!(docs[1].score, 0.1);
        assert_eq!(reranker.calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rerank_failure_keeps_fused_order() {
        for scores in [Err(AppError::Retrieval("x".into())), Ok(vec![0.9])] {
            let v = vectors(vec![vhit("a", "hr", 0.2), vhit("b", "hr", 0.4)], false);
            let reranker = Arc::new(ScriptedReranker {
                scores,
                calls: AtomicUsize::new(0),
            });
            let r = retriever(false, v, None).with_reranker(reranker);
            let docs = r.retrieve("q", &strategy(&["hr"], &[], 5)).await.unwrap();
            assert_eq!(docs[0].document_id, "a");
            assert_eq!(docs[0].score, 0.9);
        }
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        struct Slow;
        #[async_trait]
        impl VectorIndex for Slow {
            async fn search(&self, _q: &[f32], _k: usize, _s: &[String]) -> AppResult<Vec<VectorHit>> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Vec::new())
            }
        }
        let timeouts = TimeoutSettings {
            search_ms: 20,
            ..TimeoutSettings::default()
        };
        let r = HybridRetriever::new(
            Arc::new(FixedEmbedder { fail: false }),
            Arc::new(Slow),
            settings(false),
            timeouts,
        );
        let err = r.retrieve("q", &strategy(&["hr"], &[], 5)).await.unwrap_err();
        assert!(err.into_inner().is_timeout());
    }
}

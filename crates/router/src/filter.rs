//! Last access check before retrieved text reaches the caller.

use std::cmp::Ordering;

use crate::types::{AccessContext, CandidateDocument, RetrievalStrategy};

/// Keep candidates that clear the relevance threshold, sit in a scope the
/// caller may read and, when a department was detected, belong to it. Best
/// first, at most `max_results`.
///
/// The scope check runs regardless of how retrieval was scoped.
pub fn filter_candidates(
    mut candidates: Vec<CandidateDocument>,
    strategy: &RetrievalStrategy,
    access: &AccessContext,
    keywords: &[String],
) -> Vec<CandidateDocument> {
    let retrieved = candidates.len();
    let threshold = strategy.relevance_threshold;

    candidates.retain(|c| c.score.is_finite() && c.score >= threshold);
    let relevant = candidates.len();

    candidates.retain(|c| access.can_access(&c.scope));
    let permitted = candidates.len();
    if permitted < relevant {
        tracing::warn!(
            dropped = relevant - permitted,
            "candidates outside the caller's scopes removed"
        );
    }

    if let Some(detected) = strategy.detected_scope.as_deref() {
        candidates.retain(|c| matches_intent(c, detected, keywords));
        if candidates.len() < permitted {
            tracing::debug!(
                dropped = permitted - candidates.len(),
                detected,
                "candidates unrelated to the detected department removed"
            );
        }
    }
    let aligned = candidates.len();

    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    candidates.truncate(strategy.max_results);

    tracing::debug!(
        retrieved,
        relevant,
        permitted,
        aligned,
        kept = candidates.len(),
        threshold,
        "candidates filtered"
    );
    candidates
}

/// A candidate belongs to the detected department when it lives in that
/// scope, or its title names the department or one of the query keywords.
/// Title matching ignores case.
pub fn matches_intent(candidate: &CandidateDocument, detected: &str, keywords: &[String]) -> bool {
    if candidate.scope == detected {
        return true;
    }
    let title = candidate.title.to_lowercase();
    if title.contains(&detected.to_lowercase()) {
        return true;
    }
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .any(|k| !k.is_empty() && title.contains(&k))
}

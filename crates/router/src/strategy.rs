//! Retrieval planning: which scopes to search, how many results, how strict.

use enclave_core::AppError;

use crate::stage::StageError;
use crate::types::{AccessContext, IntentAnalysis, RetrievalStrategy, PUBLIC_SCOPE};

const HIGH_CONFIDENCE: f32 = 0.7;
const MEDIUM_CONFIDENCE: f32 = 0.4;

const BASE_RESULTS: usize = 5;
const MIN_RESULTS: usize = 3;
const MAX_RESULTS: usize = 10;

/// Strategy used when planning itself fails.
pub fn default_strategy(access: &AccessContext) -> RetrievalStrategy {
    let primary_scopes = if access.can_access(PUBLIC_SCOPE) {
        vec![PUBLIC_SCOPE.to_string()]
    } else {
        Vec::new()
    };
    RetrievalStrategy {
        primary_scopes,
        secondary_scopes: Vec::new(),
        max_results: BASE_RESULTS,
        relevance_threshold: 0.3,
        detected_scope: None,
        has_permission: true,
        reasoning: "default strategy: public documents only".to_string(),
    }
}

/// Combine access and intent into a retrieval strategy.
///
/// Pure: the same inputs always give the same strategy. Every scope named in
/// the result is one the caller may read, and no scope appears twice.
pub fn plan(
    access: &AccessContext,
    intent: &IntentAnalysis,
    query: &str,
) -> Result<RetrievalStrategy, StageError> {
    let confidence = intent.confidence;
    if !confidence.is_finite() {
        return Err(StageError::Recoverable(AppError::Validation(format!(
            "intent confidence is not finite: {}",
            confidence
        ))));
    }

    let permitted = &access.permitted_scopes;
    let detected = intent.detected_scope.as_deref();
    let has_permission = detected.map_or(true, |scope| access.can_access(scope));
    let public_only = || -> Vec<String> {
        if access.can_access(PUBLIC_SCOPE) {
            vec![PUBLIC_SCOPE.to_string()]
        } else {
            Vec::new()
        }
    };

    let (primary, secondary, reasoning) = match detected {
        Some(scope) if confidence > HIGH_CONFIDENCE && has_permission => (
            vec![scope.to_string()],
            remaining(permitted, &[scope]),
            format!("high confidence for '{}', searching it first", scope),
        ),
        Some(scope) if confidence > HIGH_CONFIDENCE => (
            public_only(),
            Vec::new(),
            format!("high confidence for '{}' but caller lacks access, public only", scope),
        ),
        Some(scope) if confidence > MEDIUM_CONFIDENCE && has_permission => {
            let mut primary = vec![scope.to_string()];
            if scope != PUBLIC_SCOPE && access.can_access(PUBLIC_SCOPE) {
                primary.push(PUBLIC_SCOPE.to_string());
            }
            let secondary = remaining(permitted, &primary);
            (
                primary,
                secondary,
                format!("medium confidence for '{}', adding public as a safety net", scope),
            )
        }
        Some(scope) if confidence > MEDIUM_CONFIDENCE => (
            public_only(),
            Vec::new(),
            format!("medium confidence for '{}' but caller lacks access, public only", scope),
        ),
        _ => {
            let home = access.department.as_str();
            let primary: Vec<String> = if home != PUBLIC_SCOPE && access.can_access(home) {
                vec![home.to_string()]
            } else {
                permitted.iter().take(2).cloned().collect()
            };
            let secondary = remaining(permitted, &primary);
            (
                primary,
                secondary,
                "ambiguous intent, starting from the caller's home scope".to_string(),
            )
        }
    };

    let strategy = RetrievalStrategy {
        primary_scopes: primary,
        secondary_scopes: secondary,
        max_results: max_results(query, confidence),
        relevance_threshold: relevance_threshold(confidence),
        detected_scope: intent.detected_scope.clone(),
        has_permission,
        reasoning,
    };

    tracing::info!(
        primary = ?strategy.primary_scopes,
        secondary = ?strategy.secondary_scopes,
        max_results = strategy.max_results,
        threshold = strategy.relevance_threshold,
        has_permission,
        "retrieval planned"
    );
    Ok(strategy)
}

/// Longer or less certain queries ask for more candidates.
pub fn max_results(query: &str, confidence: f32) -> usize {
    let tokens = query.split_whitespace().count();
    let mut n = BASE_RESULTS as i64;
    if tokens > 10 {
        n += 2;
    } else if tokens < 5 {
        n -= 1;
    }
    if confidence > 0.8 {
        n += 1;
    } else if confidence < 0.3 {
        n += 2;
    }
    n.clamp(MIN_RESULTS as i64, MAX_RESULTS as i64) as usize
}

pub fn relevance_threshold(confidence: f32) -> f32 {
    if confidence > 0.8 {
        0.25
    } else if confidence > 0.5 {
        0.20
    } else {
        0.15
    }
}

fn remaining(permitted: &[String], taken: &[impl AsRef<str>]) -> Vec<String> {
    permitted
        .iter()
        .filter(|s| !taken.iter().any(|t| t.as_ref() == s.as_str()))
        .cloned()
        .collect()
}

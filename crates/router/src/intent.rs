//! Intent classification: which department's documents a question is about.

use std::sync::Arc;
use std::time::Duration;

use enclave_core::{AppError, AppResult};
use enclave_llm::{LlmClient, LlmRequest};
use enclave_prompt::{ids, PromptLibrary};
use serde_json::{json, Value};

use crate::stage::StageError;
use crate::types::{AccessContext, IntentAnalysis};

const DEFAULT_TEMPERATURE: f32 = 0.1;
const DEFAULT_MAX_TOKENS: u32 = 500;

pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptLibrary>,
    model: String,
    timeout: Duration,
}

impl IntentClassifier {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        prompts: Arc<PromptLibrary>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            llm,
            prompts,
            model: model.into(),
            timeout,
        }
    }

    /// Ask the model which of `departments` the query belongs to.
    ///
    /// Every failure (no departments, LLM error or timeout, unparseable
    /// reply) is recoverable; the default is [`IntentAnalysis::unknown`].
    pub async fn classify(
        &self,
        query: &str,
        access: &AccessContext,
        departments: &[String],
    ) -> Result<IntentAnalysis, StageError> {
        if departments.is_empty() {
            return Err(StageError::Recoverable(AppError::Config(
                "no departments known to classify against".to_string(),
            )));
        }

        let prompt = self
            .prompts
            .render(
                ids::INTENT_CLASSIFY,
                &json!({
                    "departments": departments,
                    "user": {
                        "department": access.department,
                        "role": access.role.as_str(),
                        "scopes": access.permitted_scopes,
                    },
                    "query": query,
                }),
            )
            .map_err(StageError::Recoverable)?;

        let mut request = LlmRequest::new(prompt.user, self.model.as_str())
            .with_temperature(prompt.params.temperature.unwrap_or(DEFAULT_TEMPERATURE))
            .with_max_tokens(prompt.params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS));
        if let Some(system) = prompt.system {
            request = request.with_system(system);
        }

        let response = match tokio::time::timeout(self.timeout, self.llm.complete(&request)).await
        {
            Err(_) => {
                return Err(StageError::Recoverable(AppError::timeout(
                    "intent classification",
                    self.timeout,
                )))
            }
            Ok(result) => result.map_err(StageError::Recoverable)?,
        };

        let analysis =
            parse_intent_response(&response.content, departments).map_err(StageError::Recoverable)?;

        tracing::info!(
            detected = analysis.detected_scope.as_deref().unwrap_or("none"),
            confidence = analysis.confidence,
            keywords = ?analysis.keywords,
            "intent classified"
        );
        Ok(analysis)
    }
}

/// Parse the classifier's reply.
///
/// Takes the span from the first `{` to the last `}` so prose or code fences
/// around the object are tolerated. The department is matched
/// case-insensitively against `departments` and returned in its canonical
/// spelling; anything else (unknown name, `"null"`, empty) means no
/// department, with confidence 0.0. Confidence may be a number or a numeric
/// string and is clamped to [0, 1]; a missing confidence reads as 0.0.
pub fn parse_intent_response(raw: &str, departments: &[String]) -> AppResult<IntentAnalysis> {
    let (start, end) = match (raw.find('{'), raw.rfind('}')) {
        (Some(s), Some(e)) if s < e => (s, e),
        _ => {
            return Err(AppError::Serialization(
                "classifier reply contains no JSON object".to_string(),
            ))
        }
    };

    let value: Value = serde_json::from_str(&raw[start..=end])?;
    let obj = value.as_object().ok_or_else(|| {
        AppError::Serialization("classifier reply is not a JSON object".to_string())
    })?;

    let confidence = match obj.get("confidence") {
        None => 0.0,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
        Some(_) => f64::NAN,
    };
    if !confidence.is_finite() {
        return Err(AppError::Serialization(format!(
            "classifier confidence is not a number: {:?}",
            obj.get("confidence")
        )));
    }

    let detected_scope = match obj.get("detected_department") {
        Some(Value::String(name)) => canonical_department(name, departments),
        _ => None,
    };

    let confidence = if detected_scope.is_some() {
        confidence.clamp(0.0, 1.0) as f32
    } else {
        0.0
    };

    let keywords = obj
        .get("keywords")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let reasoning = obj
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(IntentAnalysis {
        detected_scope,
        confidence,
        keywords,
        reasoning,
    })
}

fn canonical_department(name: &str, departments: &[String]) -> Option<String> {
    let name = name.trim();
    if name.is_empty() || name.eq_ignore_ascii_case("null") || name.eq_ignore_ascii_case("none") {
        return None;
    }
    let found = departments
        .iter()
        .find(|d| d.eq_ignore_ascii_case(name) || d.to_lowercase() == name.to_lowercase());
    if found.is_none() {
        tracing::debug!(department = name, "classifier named an unknown department");
    }
    found.cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn departments() -> Vec<String> {
        vec!["finance".to_string(), "hr".to_string(), "it".to_string()]
    }

    #[test]
    fn test_plain_object() {
        let analysis = parse_intent_response(
            r#"{"detected_department": "hr", "confidence": 0.9, "keywords": ["leave"], "reasoning": "leave policy"}"#,
            &departments(),
        )
        .unwrap();
        assert_eq!(analysis.detected_scope.as_deref(), Some("hr"));
        assert_eq!(analysis.confidence, 0.9);
        assert_eq!(analysis.keywords, vec!["leave"]);
        assert_eq!(analysis.reasoning, "leave policy");
    }

    #[test]
    fn test_object_wrapped_in_prose_and_fences() {
        let raw = "Sure! Here you go:\n```json\n{\"detected_department\": \"Finance\", \"confidence\": \"0.75\"}\n```\nHope that helps.";
        let analysis = parse_intent_response(raw, &departments()).unwrap();
        assert_eq!(analysis.detected_scope.as_deref(), Some("finance"));
        assert_eq!(analysis.confidence, 0.75);
        assert!(analysis.keywords.is_empty());
    }

    #[test]
    fn test_null_department_forces_zero_confidence() {
        for dept in [r#"null"#, r#""null""#, r#""""#, r#""marketing""#] {
            let raw = format!(r#"{{"detected_department": {}, "confidence": 0.6}}"#, dept);
            let analysis = parse_intent_response(&raw, &departments()).unwrap();
            assert_eq!(analysis.detected_scope, None, "input {}", dept);
            assert_eq!(analysis.confidence, 0.0);
        }
    }

    #[test]
    fn test_confidence_clamped() {
        let analysis = parse_intent_response(
            r#"{"detected_department": "it", "confidence": 1.7}"#,
            &departments(),
        )
        .unwrap();
        assert_eq!(analysis.confidence, 1.0);
    }

    #[test]
    fn test_missing_confidence_reads_as_zero() {
        let analysis =
            parse_intent_response(r#"{"detected_department": "it"}"#, &departments()).unwrap();
        assert_eq!(analysis.detected_scope.as_deref(), Some("it"));
        assert_eq!(analysis.confidence, 0.0);
    }

    #[test]
    fn test_rejects_bad_confidence() {
        for conf in [r#""high""#, "null", "[0.5]", r#""NaN""#] {
            let raw = format!(r#"{{"detected_department": "hr", "confidence": {}}}"#, conf);
            assert!(parse_intent_response(&raw, &departments()).is_err(), "input {}", conf);
        }
    }

    #[test]
    fn test_rejects_missing_or_broken_object() {
        assert!(parse_intent_response("I think it's HR.", &departments()).is_err());
        assert!(parse_intent_response("} backwards {", &departments()).is_err());
        assert!(parse_intent_response("{not json}", &departments()).is_err());
    }

    #[test]
    fn test_non_string_keywords_skipped() {
        let analysis = parse_intent_response(
            r#"{"detected_department": "hr", "confidence": 0.8, "keywords": ["leave", 3, "", null, " payroll "]}"#,
            &departments(),
        )
        .unwrap();
        assert_eq!(analysis.keywords, vec!["leave", "payroll"]);
    }
}

//! Optional LLM rewrite of the query before it hits the search backends.

use std::sync::Arc;
use std::time::Duration;

use enclave_core::{AppError, AppResult};
use enclave_llm::{LlmClient, LlmRequest};
use enclave_prompt::{ids, PromptLibrary};
use serde_json::json;

pub struct QueryRephraser {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptLibrary>,
    model: String,
    timeout: Duration,
}

impl QueryRephraser {
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

    /// Rewritten query, or `query` itself when the rewrite fails or comes
    /// back shorter than two characters.
    pub async fn rephrase(&self, query: &str) -> String {
        match self.try_rephrase(query).await {
            Ok(rewritten) if rewritten.chars().count() >= 2 => {
                tracing::debug!(original = query, rewritten = %rewritten, "query rephrased");
                rewritten
            }
            Ok(_) => {
                tracing::warn!("rephrase returned an empty query, using the original");
                query.to_string()
            }
            Err(e) => {
                tracing::warn!(error = %e, "rephrase failed, using the original query");
                query.to_string()
            }
        }
    }

    async fn try_rephrase(&self, query: &str) -> AppResult<String> {
        let prompt = self
            .prompts
            .render(ids::QUERY_REPHRASE, &json!({ "query": query }))?;
        let mut request = LlmRequest::new(prompt.user, self.model.as_str())
            .with_temperature(prompt.params.temperature.unwrap_or(0.1))
            .with_max_tokens(prompt.params.max_tokens.unwrap_or(200));
        if let Some(system) = prompt.system {
            request = request.with_system(system);
        }

        let response = tokio::time::timeout(self.timeout, self.llm.complete(&request))
            .await
            .map_err(|_| AppError::timeout("query rephrase", self.timeout))??;
        Ok(clean(&response.content))
    }
}

/// Strip whitespace and the quotes models like to wrap single-line
/// answers in.
fn clean(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean() {
        assert_eq!(clean("  \"annual leave entitlement\"\n"), "annual leave entitlement");
        assert_eq!(clean("`vpn setup`"), "vpn setup");
        assert_eq!(clean("  "), "");
    }
}

//! HTTP cross-encoder reranker (Cohere/Jina/TEI style `/rerank` endpoint).

use std::time::Duration;

use async_trait::async_trait;
use enclave_core::{AppError, AppResult};
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::RerankSettings;
use crate::index::Reranker;

#[derive(Debug, Clone)]
pub struct HttpReranker {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpReranker {
    pub fn new(settings: &RerankSettings, timeout: Duration) -> AppResult<Self> {
        let base = settings
            .endpoint
            .as_deref()
            .ok_or_else(|| AppError::Config("rerank.endpoint is not set".to_string()))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build rerank client: {}", e)))?;
        let api_key = settings
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty());

        Ok(Self {
            client,
            url: format!("{}{}", base.trim_end_matches('/'), settings.path),
            model: settings.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(&self, query: &str, documents: &[String]) -> AppResult<Vec<f32>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let body = json!({ "model": self.model, "query": query, "documents": documents });
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Retrieval(format!("Rerank request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Retrieval(format!("Rerank service returned {}", status)));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| AppError::Retrieval(format!("Invalid rerank response: {}", e)))?;
        parse_rerank_response(&json, documents.len())
    }
}

/// Scores aligned with the submitted documents. Documents the service left
/// out score 0.0; out-of-range indices are ignored.
pub fn parse_rerank_response(json: &Value, doc_count: usize) -> AppResult<Vec<f32>> {
    let mut scores = vec![0.0f32; doc_count];
    let results = json
        .get("results")
        .or_else(|| json.get("data"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            AppError::Serialization("Rerank response is missing results array".to_string())
        })?;

    for item in results {
        let index = item
            .get("index")
            .and_then(Value::as_u64)
            .ok_or_else(|| AppError::Serialization("Rerank result missing index".to_string()))?
            as usize;
        let score = item
            .get("relevance_score")
            .or_else(|| item.get("score"))
            .and_then(Value::as_f64)
            .ok_or_else(|| AppError::Serialization("Rerank result missing score".to_string()))?
            as f32;
        if let Some(slot) = scores.get_mut(index) {
            *slot = score;
        }
    }

    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligns_scores_by_index() {
        let json = json!({
            "results": [
                { "index": 1, "relevance_score": 0.2 },
                { "index": 0, "relevance_score": 0.9 }
            ]
        });
        assert_eq!(parse_rerank_response(&json, 2).unwrap(), vec![0.9, 0.2]);
    }

    #[test]
    fn test_data_array_and_score_key() {
        let json = json!({ "data": [ { "index": 2, "score": 0.5 }, { "index": 7, "score": 1.0 } ] });
        assert_eq!(parse_rerank_response(&json, 3).unwrap(), vec![0.0, 0.0, 0.5]);
    }

    #[test]
    fn test_malformed_response() {
        assert!(parse_rerank_response(&json!({ "ok": true }), 1).is_err());
        assert!(parse_rerank_response(&json!({ "results": [ { "relevance_score": 0.1 } ] }), 1).is_err());
    }

    #[test]
    fn test_requires_endpoint() {
        let settings = RerankSettings::default();
        assert!(HttpReranker::new(&settings, Duration::from_secs(1)).is_err());

        let settings = RerankSettings {
            endpoint: Some("http://rerank:8080/".to_string()),
            ..RerankSettings::default()
        };
        let reranker = HttpReranker::new(&settings, Duration::from_secs(1)).unwrap();
        assert_eq!(reranker.url, "http://rerank:8080/v1/rerank");
    }
}

//! Ollama embedding provider (`/api/embed`, batch capable).

use crate::embeddings::{EmbeddingConfig, EmbeddingProvider};
use enclave_core::{AppError, AppResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const EMBED_ENDPOINT: &str = "/api/embed";

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    dimensions: usize,
    batch_size: usize,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

impl OllamaProvider {
    /// No network traffic happens here; call [`OllamaProvider::verify`] to
    /// check the model up front.
    pub fn new(config: &EmbeddingConfig) -> AppResult<Self> {
        let base_url = config
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());

        Ok(Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            batch_size: config.batch_size.max(1),
        })
    }

    /// Embed a probe string and check the returned dimensionality.
    pub async fn verify(&self) -> AppResult<()> {
        let probe = self.embed_request(&["connection check".to_string()]).await.map_err(|e| {
            AppError::Retrieval(format!(
                "Ollama not available at {} ({}). Ensure the model is installed: ollama pull {}",
                self.base_url, e, self.model
            ))
        })?;
        debug!(model = %self.model, dims = probe.first().map(Vec::len), "Ollama embeddings ready");
        Ok(())
    }

    #[instrument(skip(self, texts), fields(batch = texts.len(), model = %self.model))]
    async fn embed_request(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        let url = format!("{}{}", self.base_url, EMBED_ENDPOINT);

        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| AppError::Retrieval(format!("Failed to reach Ollama: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = serde_json::from_str::<ErrorResponse>(&error_text)
                .map(|e| e.error)
                .unwrap_or(error_text);
            return Err(AppError::Retrieval(format!(
                "Ollama embed error ({}): {}",
                status, message
            )));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| AppError::Retrieval(format!("Failed to parse Ollama response: {}", e)))?;

        check_shape(&body.embeddings, texts.len(), self.dimensions)?;
        Ok(body.embeddings)
    }
}

fn check_shape(embeddings: &[Vec<f32>], expected_count: usize, dimensions: usize) -> AppResult<()> {
    if embeddings.len() != expected_count {
        return Err(AppError::Retrieval(format!(
            "Ollama returned {} embeddings for {} inputs",
            embeddings.len(),
            expected_count
        )));
    }
    if let Some(bad) = embeddings.iter().find(|e| e.len() != dimensions) {
        return Err(AppError::Retrieval(format!(
            "Unexpected embedding dimensions: got {}, expected {}",
            bad.len(),
            dimensions
        )));
    }
    Ok(())
}

#[async_trait::async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            embeddings.extend(self.embed_request(batch).await?);
        }
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "ollama".to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions: 3,
            endpoint: Some("http://embed-host:11434/".to_string()),
            batch_size: 2,
        }
    }

    #[test]
    fn test_provider_settings() {
        let provider = OllamaProvider::new(&config()).unwrap();
        assert_eq!(provider.base_url, "http://embed-host:11434");
        assert_eq!(provider.model_name(), "nomic-embed-text");
        assert_eq!(provider.batch_size, 2);
    }

    #[test]
    fn test_request_shape() {
        let input = vec!["a".to_string(), "b".to_string()];
        let body = serde_json::to_value(EmbedRequest {
            model: "m",
            input: &input,
        })
        .unwrap();
        assert_eq!(body["input"][1], "b");
    }

    #[test]
    fn test_check_shape() {
        let good = vec![vec![0.1, 0.2, 0.3]];
        assert!(check_shape(&good, 1, 3).is_ok());
        assert!(check_shape(&good, 2, 3).is_err());
        assert!(check_shape(&[vec![0.1]], 1, 3).is_err());
    }

    #[tokio::test]
    async fn test_empty_batch_skips_network() {
        let provider = OllamaProvider::new(&config()).unwrap();
        assert!(provider.embed_batch(&[]).await.unwrap().is_empty());
    }
}

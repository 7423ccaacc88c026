//! Embedding provider trait and factory.

use crate::embeddings::config::EmbeddingConfig;
use enclave_core::{AppError, AppResult};
use std::sync::Arc;

/// Turns text into vectors.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    /// Provider name (e.g., "mock", "ollama")
    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let mut results = self.embed_batch(&[text.to_string()]).await?;
        results
            .pop()
            .ok_or_else(|| AppError::Retrieval("No embedding returned".to_string()))
    }
}

pub fn create_provider(config: &EmbeddingConfig) -> AppResult<Arc<dyn EmbeddingProvider>> {
    config.validate()?;

    match config.provider.as_str() {
        "mock" | "trigram" => Ok(Arc::new(super::providers::mock::MockProvider::new(
            config.dimensions,
        ))),

        "ollama" => Ok(Arc::new(super::providers::ollama::OllamaProvider::new(
            config,
        )?)),

        _ => Err(AppError::Config(format!(
            "Unknown embedding provider: '{}'. Supported providers: mock, ollama",
            config.provider
        ))),
    }
}

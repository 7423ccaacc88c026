//! Router configuration, decoded from the `router:` section of
//! `.enclave/config.yaml`.
//!
//! ```yaml
//! router:
//!   pipeline:
//!     allow_anonymous: true
//!   retrieval:
//!     lexical_enabled: true
//!     vector_weight: 0.7
//!     lexical_weight: 0.3
//!   history:
//!     max_messages: 20
//!   timeouts:
//!     search_ms: 3000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use enclave_core::{AppConfig, AppError, AppResult};
use serde::{Deserialize, Serialize};

use crate::embeddings::EmbeddingConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RouterConfig {
    pub pipeline: PipelineSettings,
    pub retrieval: RetrievalSettings,
    pub history: HistorySettings,
    pub timeouts: TimeoutSettings,
    pub models: ModelSettings,
    pub embedding: EmbeddingConfig,
    pub rerank: RerankSettings,
    pub sources: SourceSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Serve requests that carry no identity, with the anonymous context
    pub allow_anonymous: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            allow_anonymous: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub lexical_enabled: bool,
    pub vector_weight: f32,
    pub lexical_weight: f32,
    /// Lexical search asks for `k * lexical_oversample` hits because hits
    /// outside the tier's scopes are dropped afterwards
    pub lexical_oversample: usize,
    pub rerank_enabled: bool,
    pub rephrase_enabled: bool,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            lexical_enabled: true,
            vector_weight: 0.7,
            lexical_weight: 0.3,
            lexical_oversample: 2,
            rerank_enabled: false,
            rephrase_enabled: false,
        }
    }
}

impl RetrievalSettings {
    /// Fusion weights scaled to sum to 1.
    pub fn normalized_weights(&self) -> (f32, f32) {
        let total = self.vector_weight + self.lexical_weight;
        if total <= 0.0 {
            return (1.0, 0.0);
        }
        (self.vector_weight / total, self.lexical_weight / total)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    /// Messages kept per session (user and assistant each count as one)
    pub max_messages: usize,
    /// Exchanges injected into answer prompts
    pub prompt_exchanges: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            max_messages: 20,
            prompt_exchanges: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub identity_ms: u64,
    /// Non-streaming LLM calls (classification, rephrasing)
    pub llm_ms: u64,
    /// Opening an answer stream
    pub stream_open_ms: u64,
    /// Longest wait for the next piece of a streamed answer
    pub stream_idle_ms: u64,
    pub embed_ms: u64,
    pub search_ms: u64,
    pub rerank_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            identity_ms: 2_000,
            llm_ms: 20_000,
            stream_open_ms: 30_000,
            stream_idle_ms: 30_000,
            embed_ms: 5_000,
            search_ms: 5_000,
            rerank_ms: 5_000,
        }
    }
}

impl TimeoutSettings {
    pub fn identity(&self) -> Duration {
        Duration::from_millis(self.identity_ms)
    }

    pub fn llm(&self) -> Duration {
        Duration::from_millis(self.llm_ms)
    }

    pub fn stream_open(&self) -> Duration {
        Duration::from_millis(self.stream_open_ms)
    }

    pub fn stream_idle(&self) -> Duration {
        Duration::from_millis(self.stream_idle_ms)
    }

    pub fn embed(&self) -> Duration {
        Duration::from_millis(self.embed_ms)
    }

    pub fn search(&self) -> Duration {
        Duration::from_millis(self.search_ms)
    }

    pub fn rerank(&self) -> Duration {
        Duration::from_millis(self.rerank_ms)
    }
}

/// Per-task model overrides. Unset entries use the workspace's active model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModelSettings {
    pub classifier: Option<String>,
    pub answer: Option<String>,
    pub rephrase: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankSettings {
    /// Base URL of a `/rerank` service (Cohere/Jina/TEI style)
    pub endpoint: Option<String>,
    pub path: String,
    pub model: String,
    #[serde(rename = "apiKeyEnv")]
    pub api_key_env: Option<String>,
}

impl Default for RerankSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            path: "/v1/rerank".to_string(),
            model: "bge-reranker-v2-m3".to_string(),
            api_key_env: None,
        }
    }
}

/// Local data sources used by the CLI, relative to `.enclave/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub directory: PathBuf,
    pub corpus: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("directory.yaml"),
            corpus: PathBuf::from("corpus"),
            chunk_size: 800,
            chunk_overlap: 100,
        }
    }
}

impl SourceSettings {
    pub fn directory_path(&self, enclave_dir: &Path) -> PathBuf {
        enclave_dir.join(&self.directory)
    }

    pub fn corpus_path(&self, enclave_dir: &Path) -> PathBuf {
        enclave_dir.join(&self.corpus)
    }
}

impl RouterConfig {
    /// Decode the `router:` section of the application config, or defaults
    /// when absent.
    pub fn from_app_config(app: &AppConfig) -> AppResult<Self> {
        let config = match app.router {
            Some(ref value) => serde_yaml::from_value::<Self>(value.clone())
                .map_err(|e| AppError::Config(format!("Invalid router section: {}", e)))?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        let r = &self.retrieval;
        if r.vector_weight < 0.0 || r.lexical_weight < 0.0 {
            return Err(AppError::Config(
                "Fusion weights must be non-negative".to_string(),
            ));
        }
        if r.vector_weight + r.lexical_weight <= 0.0 {
            return Err(AppError::Config(
                "At least one fusion weight must be positive".to_string(),
            ));
        }
        if r.lexical_oversample == 0 {
            return Err(AppError::Config(
                "lexical_oversample must be at least 1".to_string(),
            ));
        }
        if self.history.max_messages < 2 {
            return Err(AppError::Config(
                "history.max_messages must hold at least one exchange".to_string(),
            ));
        }
        let t = &self.timeouts;
        if [
            t.identity_ms,
            t.llm_ms,
            t.stream_open_ms,
            t.stream_idle_ms,
            t.embed_ms,
            t.search_ms,
            t.rerank_ms,
        ]
        .contains(&0)
        {
            return Err(AppError::Config("Timeouts must be positive".to_string()));
        }
        if self.sources.chunk_overlap >= self.sources.chunk_size {
            return Err(AppError::Config(
                "chunk_overlap must be smaller than chunk_size".to_string(),
            ));
        }
        self.embedding.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RouterConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.pipeline.allow_anonymous);
        assert_eq!(config.history.max_messages, 20);
        assert_eq!(config.retrieval.normalized_weights(), (0.7, 0.3));
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let mut app = AppConfig::default();
        app.router = Some(
            serde_yaml::from_str(
                "pipeline:\n  allow_anonymous: false\nretrieval:\n  vector_weight: 2.0\n  lexical_weight: 2.0\n",
            )
            .unwrap(),
        );

        let config = RouterConfig::from_app_config(&app).unwrap();
        assert!(!config.pipeline.allow_anonymous);
        assert_eq!(config.retrieval.normalized_weights(), (0.5, 0.5));
        assert_eq!(config.timeouts.search_ms, 5_000);
    }

    #[test]
    fn test_rejects_zero_weights() {
        let mut config = RouterConfig::default();
        config.retrieval.vector_weight = 0.0;
        config.retrieval.lexical_weight = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_stream_idle_timeout() {
        let mut config = RouterConfig::default();
        config.timeouts.stream_idle_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_tiny_history() {
        let mut config = RouterConfig::default();
        config.history.max_messages = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_shape() {
        let mut app = AppConfig::default();
        app.router = Some(serde_yaml::from_str("retrieval: [1, 2]").unwrap());
        assert!(matches!(
            RouterConfig::from_app_config(&app),
            Err(AppError::Config(_))
        ));
    }
}

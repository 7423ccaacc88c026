//! Configuration management.
//!
//! Sources, lowest precedence first:
//! - Built-in defaults
//! - `.enclave/config.yaml` (or the file named by `ENCLAVE_CONFIG`)
//! - Environment variables
//! - Command-line flags (`with_overrides`)
//!
//! The `router:` section of the YAML file is kept as a raw value and decoded
//! by the router crate, which owns its schema.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};
use crate::logging::LogFormat;

/// Providers the LLM factory knows how to build.
pub const KNOWN_PROVIDERS: &[&str] = &["ollama", "openai"];

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (contains .enclave/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Active LLM provider ("ollama", "openai")
    pub provider: String,

    /// Model identifier for the active provider
    pub model: String,

    /// API key for the LLM provider
    pub api_key: Option<String>,

    /// Log level override
    pub log_level: Option<String>,

    /// Log line format
    #[serde(skip)]
    pub log_format: LogFormat,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,

    /// LLM provider configurations
    pub llm: Option<LlmConfig>,

    /// Raw `router:` section, decoded by `enclave-router`
    #[serde(skip)]
    pub router: Option<serde_yaml::Value>,
}

/// LLM configuration from config.yaml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(rename = "activeProvider")]
    pub active_provider: String,

    #[serde(rename = "activeEmbeddingProvider", default)]
    pub active_embedding_provider: Option<String>,

    pub providers: HashMap<String, ProviderConfig>,
}

/// Provider-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProviderConfig {
    /// Any OpenAI-compatible chat completions endpoint
    OpenAI {
        #[serde(rename = "apiKeyEnv")]
        api_key_env: String,
        model: String,
        #[serde(rename = "embeddingModel")]
        embedding_model: Option<String>,
        endpoint: Option<String>,
        timeout: Option<u64>,
    },
    Ollama {
        endpoint: String,
        model: String,
        #[serde(rename = "embeddingModel")]
        embedding_model: Option<String>,
        timeout: Option<u64>,
    },
}

impl ProviderConfig {
    pub fn model(&self) -> &str {
        match self {
            Self::OpenAI { model, .. } | Self::Ollama { model, .. } => model,
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::OpenAI { endpoint, .. } => endpoint.as_deref(),
            Self::Ollama { endpoint, .. } => Some(endpoint),
        }
    }

    pub fn embedding_model(&self) -> Option<&str> {
        match self {
            Self::OpenAI {
                embedding_model, ..
            }
            | Self::Ollama {
                embedding_model, ..
            } => embedding_model.as_deref(),
        }
    }

    /// Request timeout in seconds, if configured.
    pub fn timeout(&self) -> Option<u64> {
        match self {
            Self::OpenAI { timeout, .. } | Self::Ollama { timeout, .. } => *timeout,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    llm: Option<LlmConfig>,
    workspace: Option<WorkspaceConfig>,
    logging: Option<LoggingConfig>,
    router: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct WorkspaceConfig {
    path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
    format: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            provider: "ollama".to_string(),
            model: "llama3.2".to_string(),
            api_key: None,
            log_level: None,
            log_format: LogFormat::Pretty,
            verbose: false,
            no_color: false,
            llm: None,
            router: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, the workspace YAML file and the
    /// environment.
    ///
    /// Environment variables:
    /// - `ENCLAVE_WORKSPACE`: workspace path
    /// - `ENCLAVE_CONFIG`: config file path
    /// - `ENCLAVE_PROVIDER`, `ENCLAVE_MODEL`, `ENCLAVE_API_KEY`
    /// - `ENCLAVE_LOG_FORMAT`: `pretty` or `json`
    /// - `RUST_LOG`, `NO_COLOR`
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(workspace) = std::env::var("ENCLAVE_WORKSPACE") {
            config.workspace = PathBuf::from(workspace);
        }

        if let Ok(config_file) = std::env::var("ENCLAVE_CONFIG") {
            config.config_file = Some(PathBuf::from(config_file));
        }

        if !config.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                config.workspace
            )));
        }

        let config_path = config.config_path();
        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        if let Ok(provider) = std::env::var("ENCLAVE_PROVIDER") {
            config.provider = provider;
        }

        if let Ok(model) = std::env::var("ENCLAVE_MODEL") {
            config.model = model;
        }

        if let Ok(key) = std::env::var("ENCLAVE_API_KEY") {
            config.api_key = Some(key);
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            config.log_level = Some(level);
        }

        if let Some(format) = std::env::var("ENCLAVE_LOG_FORMAT")
            .ok()
            .and_then(|f| LogFormat::parse(&f))
        {
            config.log_format = format;
        }

        if std::env::var("NO_COLOR").is_ok() {
            config.no_color = true;
        }

        Ok(config)
    }

    /// Path of the YAML file `load` reads.
    pub fn config_path(&self) -> PathBuf {
        match self.config_file {
            Some(ref cf) => cf.clone(),
            None => self.enclave_dir().join("config.yaml"),
        }
    }

    /// Merge a YAML configuration file into a copy of this config.
    pub fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config_file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;

        let mut result = self.clone();

        if let Some(path) = config_file.workspace.and_then(|ws| ws.path) {
            result.workspace = PathBuf::from(path);
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
            if let Some(format) = logging.format.as_deref().and_then(LogFormat::parse) {
                result.log_format = format;
            }
        }

        if let Some(llm) = config_file.llm {
            result.provider = llm.active_provider.clone();
            if let Some(provider_config) = llm.providers.get(&llm.active_provider) {
                result.model = provider_config.model().to_string();
            }
            result.llm = Some(llm);
        }

        if config_file.router.is_some() {
            result.router = config_file.router;
        }

        Ok(result)
    }

    /// Apply CLI overrides. Flags win over environment and file values.
    #[allow(clippy::too_many_arguments)]
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        config_file: Option<PathBuf>,
        provider: Option<String>,
        model: Option<String>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(provider) = provider {
            self.provider = provider;
        }

        if let Some(model) = model {
            self.model = model;
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Path to the `.enclave` directory.
    pub fn enclave_dir(&self) -> PathBuf {
        self.workspace.join(".enclave")
    }

    pub fn get_provider_config(&self, provider: &str) -> Option<&ProviderConfig> {
        self.llm.as_ref().and_then(|llm| llm.providers.get(provider))
    }

    /// Endpoint configured for a provider, if any.
    pub fn provider_endpoint(&self, provider: &str) -> Option<String> {
        self.get_provider_config(provider)
            .and_then(|p| p.endpoint())
            .map(str::to_string)
    }

    /// Resolve the API key: `ENCLAVE_API_KEY` first, then the provider's
    /// `apiKeyEnv` variable.
    pub fn resolve_api_key(&self, provider: &str) -> Option<String> {
        if let Some(ref key) = self.api_key {
            return Some(key.clone());
        }

        match self.get_provider_config(provider) {
            Some(ProviderConfig::OpenAI { api_key_env, .. }) => std::env::var(api_key_env).ok(),
            _ => None,
        }
    }

    /// Validate configuration for the active provider.
    pub fn validate(&self) -> AppResult<()> {
        let provider = self.provider.to_lowercase();

        if !KNOWN_PROVIDERS.contains(&provider.as_str()) {
            return Err(AppError::Config(format!(
                "Unknown provider: {}. Supported: {}",
                self.provider,
                KNOWN_PROVIDERS.join(", ")
            )));
        }

        if provider == "openai" && self.resolve_api_key(&provider).is_none() {
            let hint = match self.get_provider_config(&provider) {
                Some(ProviderConfig::OpenAI { api_key_env, .. }) => api_key_env.clone(),
                _ => "ENCLAVE_API_KEY".to_string(),
            };
            return Err(AppError::Config(format!(
                "API key not found in environment variable: {}",
                hint
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.provider, "ollama");
        assert_eq!(config.model, "llama3.2");
        assert!(!config.verbose);
        assert!(config.router.is_none());
    }

    #[test]
    fn test_enclave_dir() {
        let config = AppConfig::default();
        assert!(config.enclave_dir().ends_with(".enclave"));
        assert!(config.config_path().ends_with(".enclave/config.yaml"));
    }

    #[test]
    fn test_with_overrides() {
        let overridden = AppConfig::default().with_overrides(
            None,
            None,
            Some("openai".to_string()),
            Some("qwen-plus".to_string()),
            None,
            true,
            false,
        );

        assert_eq!(overridden.provider, "openai");
        assert_eq!(overridden.model, "qwen-plus");
        assert!(overridden.verbose);
        assert_eq!(overridden.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_merge_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
logging:
  level: warn
  color: false
  format: json
llm:
  activeProvider: ollama
  providers:
    ollama:
      endpoint: http://gpu-box:11434
      model: qwen2.5
      timeout: 60
router:
  pipeline:
    allow_anonymous: false
"#
        )
        .unwrap();

        let merged = AppConfig::default().merge_yaml(file.path()).unwrap();
        assert_eq!(merged.model, "qwen2.5");
        assert_eq!(merged.log_level.as_deref(), Some("warn"));
        assert!(merged.no_color);
        assert_eq!(merged.log_format, LogFormat::Json);
        assert_eq!(
            merged.provider_endpoint("ollama").as_deref(),
            Some("http://gpu-box:11434")
        );
        assert!(merged.router.is_some());
    }

    #[test]
    fn test_merge_yaml_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "llm: [unclosed").unwrap();
        let result = AppConfig::default().merge_yaml(file.path());
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_validate_unknown_provider() {
        let mut config = AppConfig::default();
        config.provider = "unknown".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_ollama() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_openai_with_explicit_key() {
        let mut config = AppConfig::default();
        config.provider = "openai".to_string();
        config.api_key = Some("sk-test".to_string());
        assert!(config.validate().is_ok());
    }
}

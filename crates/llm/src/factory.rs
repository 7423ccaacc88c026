//! Builds an `LlmClient` from configuration values.

use std::sync::Arc;
use std::time::Duration;

use crate::client::LlmClient;
use crate::providers::{OllamaClient, OpenAiClient};
use crate::types::ProviderType;

/// Connection settings for a provider.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    /// Whole-request timeout; `None` leaves reqwest's default (no limit)
    pub timeout: Option<Duration>,
}

/// Create an LLM client for `provider`.
///
/// # Errors
/// Unknown provider name, missing API key for a keyed provider, or an
/// HTTP client that cannot be built.
pub fn create_client(
    provider: &str,
    options: &ClientOptions,
) -> Result<Arc<dyn LlmClient>, String> {
    let kind =
        ProviderType::parse(provider).ok_or_else(|| format!("Unknown provider: {}", provider))?;

    let endpoint = options
        .endpoint
        .as_deref()
        .unwrap_or_else(|| kind.default_endpoint());

    match kind {
        ProviderType::Ollama => match options.timeout {
            Some(timeout) => OllamaClient::with_timeout(endpoint, timeout)
                .map(|c| Arc::new(c) as Arc<dyn LlmClient>)
                .map_err(|e| e.to_string()),
            None => Ok(Arc::new(OllamaClient::with_base_url(endpoint))),
        },
        ProviderType::OpenAi => {
            let api_key = options
                .api_key
                .as_deref()
                .ok_or_else(|| "OpenAI provider requires API key".to_string())?;
            match options.timeout {
                Some(timeout) => OpenAiClient::with_timeout(endpoint, api_key, timeout)
                    .map(|c| Arc::new(c) as Arc<dyn LlmClient>)
                    .map_err(|e| e.to_string()),
                None => Ok(Arc::new(OpenAiClient::new(endpoint, api_key))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_ollama_client() {
        let client = create_client("ollama", &ClientOptions::default()).unwrap();
        assert_eq!(client.provider_name(), "ollama");
    }

    #[test]
    fn test_create_with_timeout() {
        let options = ClientOptions {
            endpoint: Some("http://localhost:8080".to_string()),
            timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        assert!(create_client("ollama", &options).is_ok());
    }

    #[test]
    fn test_openai_requires_api_key() {
        match create_client("openai", &ClientOptions::default()) {
            Err(err) => assert!(err.contains("requires API key")),
            Ok(_) => panic!("Expected error for OpenAI without API key"),
        }
    }

    #[test]
    fn test_openai_with_key() {
        let options = ClientOptions {
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        };
        let client = create_client("openai", &options).unwrap();
        assert_eq!(client.provider_name(), "openai");
    }

    #[test]
    fn test_unknown_provider() {
        match create_client("gguf", &ClientOptions::default()) {
            Err(err) => assert!(err.contains("Unknown provider")),
            Ok(_) => panic!("Expected error for unknown provider"),
        }
    }
}

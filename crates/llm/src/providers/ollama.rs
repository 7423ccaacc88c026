//! Ollama provider.
//!
//! API: https://github.com/ollama/ollama/blob/main/docs/api.md

use std::time::Duration;

use crate::client::{LlmClient, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, LlmUsage};
use crate::lines::split_lines;
use enclave_core::{AppError, AppResult};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "OllamaOptions::is_empty")]
    options: OllamaOptions,
    stream: bool,
}

/// Sampling parameters live under `options` in the generate API.
#[derive(Debug, Serialize, Default)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

impl OllamaOptions {
    fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.top_p.is_none() && self.num_predict.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    response: String,
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaResponse {
    fn usage(&self) -> LlmUsage {
        LlmUsage::new(
            self.prompt_eval_count.unwrap_or(0),
            self.eval_count.unwrap_or(0),
        )
    }
}

pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Client for `http://localhost:11434`.
    pub fn new() -> Self {
        Self::with_base_url("http://localhost:11434")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Client whose requests fail after `timeout`. Applies to the whole
    /// request, so streaming callers should leave it generous.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Llm(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn to_ollama_request(&self, request: &LlmRequest, stream: bool) -> OllamaRequest {
        OllamaRequest {
            model: request.model.clone(),
            prompt: request.prompt.clone(),
            system: request.system.clone(),
            options: OllamaOptions {
                temperature: request.temperature,
                top_p: request.top_p,
                num_predict: request.max_tokens,
            },
            stream,
        }
    }

    async fn send(&self, body: &OllamaRequest) -> AppResult<reqwest::Response> {
        let url = format!("{}/api/generate", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to send request to Ollama: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::Llm(format!(
                "Ollama API error ({}): {}",
                status, error_text
            )));
        }

        Ok(response)
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_chunk(line: &str) -> AppResult<LlmStreamChunk> {
    let parsed: OllamaResponse = serde_json::from_str(line)
        .map_err(|e| AppError::Llm(format!("Failed to parse chunk: {}", e)))?;

    if let Some(ref error) = parsed.error {
        return Err(AppError::Llm(format!("Ollama stream error: {}", error)));
    }

    let usage = parsed.done.then(|| parsed.usage());
    Ok(LlmStreamChunk {
        content: parsed.response,
        model: parsed.model,
        done: parsed.done,
        usage,
    })
}

#[async_trait::async_trait]
impl LlmClient for OllamaClient {
    fn provider_name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        tracing::debug!(model = %request.model, prompt_len = request.prompt.len(), "Ollama completion");

        let response = self.send(&self.to_ollama_request(request, false)).await?;

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to parse Ollama response: {}", e)))?;

        if let Some(ref error) = parsed.error {
            return Err(AppError::Llm(format!("Ollama error: {}", error)));
        }

        let usage = parsed.usage();
        Ok(LlmResponse {
            content: parsed.response,
            model: parsed.model,
            usage,
            done: parsed.done,
        })
    }

    async fn stream(&self, request: &LlmRequest) -> AppResult<LlmStream> {
        tracing::debug!(model = %request.model, prompt_len = request.prompt.len(), "Ollama stream");

        let response = self.send(&self.to_ollama_request(request, true)).await?;

        let chunks = split_lines(response.bytes_stream())
            .map(|line| line.and_then(|l| parse_chunk(&l)));

        Ok(Box::pin(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_client_creation() {
        let client = OllamaClient::with_base_url("http://gpu-box:11434/");
        assert_eq!(client.provider_name(), "ollama");
        assert_eq!(client.base_url, "http://gpu-box:11434");
    }

    #[test]
    fn test_sampling_params_go_under_options() {
        let client = OllamaClient::new();
        let request = LlmRequest::new("Hello", "llama3.2")
            .with_temperature(0.1)
            .with_max_tokens(500);

        let body = serde_json::to_value(client.to_ollama_request(&request, true)).unwrap();
        assert_eq!(body["model"], "llama3.2");
        assert_eq!(body["stream"], true);
        assert_eq!(body["options"]["num_predict"], 500);
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_empty_options_omitted() {
        let client = OllamaClient::new();
        let body =
            serde_json::to_value(client.to_ollama_request(&LlmRequest::new("x", "m"), false))
                .unwrap();
        assert!(body.get("options").is_none());
    }

    #[test]
    fn test_parse_final_chunk() {
        let chunk = parse_chunk(
            r#"{"model":"m","response":"","done":true,"prompt_eval_count":7,"eval_count":11}"#,
        )
        .unwrap();
        assert!(chunk.done);
        assert_eq!(chunk.usage, Some(LlmUsage::new(7, 11)));
    }

    #[test]
    fn test_parse_error_chunk() {
        let result = parse_chunk(r#"{"model":"m","done":false,"error":"out of memory"}"#);
        assert!(matches!(result, Err(AppError::Llm(msg)) if msg.contains("out of memory")));
    }
}

//! OpenAI-compatible chat completions provider.
//!
//! Works against OpenAI itself and the many gateways that mirror its
//! `/chat/completions` contract (DashScope compatible mode, vLLM, LiteLLM).
//! Streaming uses server-sent events terminated by `data: [DONE]`.

use std::time::Duration;

use crate::client::{LlmClient, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, LlmUsage};
use crate::lines::split_lines;
use enclave_core::{AppError, AppResult};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl From<WireUsage> for LlmUsage {
    fn from(u: WireUsage) -> Self {
        LlmUsage::new(u.prompt_tokens, u.completion_tokens)
    }
}

pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    /// `base_url` is the API root, e.g. `https://api.openai.com/v1`.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Llm(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    fn to_chat_request<'a>(&self, request: &'a LlmRequest, stream: bool) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(ref system) = request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        ChatRequest {
            model: &request.model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            stream,
        }
    }

    async fn send(&self, body: &ChatRequest<'_>) -> AppResult<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Llm(format!("Request to {} timed out", url))
                } else if e.is_connect() {
                    AppError::Llm(format!("Failed to connect to {}: {}", url, e))
                } else {
                    AppError::Llm(format!("Request to {} failed: {}", url, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let preview: String = error_text.chars().take(300).collect();
            return Err(AppError::Llm(format!("API error ({}): {}", status, preview)));
        }

        Ok(response)
    }
}

/// Decode one SSE line. Non-data lines (comments, `event:`) yield `None`.
fn parse_sse_line(line: &str) -> Option<AppResult<LlmStreamChunk>> {
    let data = line.strip_prefix("data:")?.trim();

    if data == "[DONE]" {
        return Some(Ok(LlmStreamChunk {
            content: String::new(),
            model: String::new(),
            done: true,
            usage: None,
        }));
    }

    let event: StreamEvent = match serde_json::from_str(data) {
        Ok(event) => event,
        Err(e) => return Some(Err(AppError::Llm(format!("Failed to parse event: {}", e)))),
    };

    let mut content = String::new();
    let mut finished = false;
    for choice in event.choices {
        if let Some(text) = choice.delta.content {
            content.push_str(&text);
        }
        finished |= choice.finish_reason.is_some();
    }

    Some(Ok(LlmStreamChunk {
        content,
        model: event.model,
        done: finished,
        usage: event.usage.map(LlmUsage::from),
    }))
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    fn provider_name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        tracing::debug!(model = %request.model, prompt_len = request.prompt.len(), "chat completion");

        let response = self.send(&self.to_chat_request(request, false)).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to parse completion: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::Llm("No choices returned from API".to_string()))?;

        Ok(LlmResponse {
            content,
            model: parsed.model,
            usage: parsed.usage.map(LlmUsage::from).unwrap_or_default(),
            done: true,
        })
    }

    async fn stream(&self, request: &LlmRequest) -> AppResult<LlmStream> {
        tracing::debug!(model = %request.model, prompt_len = request.prompt.len(), "chat completion stream");

        let response = self.send(&self.to_chat_request(request, true)).await?;

        let chunks = split_lines(response.bytes_stream()).filter_map(|line| async move {
            match line {
                Ok(l) => parse_sse_line(&l),
                Err(e) => Some(Err(e)),
            }
        });

        Ok(Box::pin(chunks))
    }
}

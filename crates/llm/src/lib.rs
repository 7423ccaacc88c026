//! Provider-agnostic LLM access for Enclave.
//!
//! Every provider implements [`LlmClient`], which offers a one-shot
//! completion and a token stream. Dropping an [`LlmStream`] drops the
//! underlying HTTP response, which cancels generation.
//!
//! # Providers
//! - **Ollama**: local runtime (default)
//! - **OpenAI-compatible**: any `/chat/completions` endpoint
//!
//! # Example
//! ```no_run
//! use enclave_llm::{LlmClient, LlmRequest, providers::OllamaClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OllamaClient::new();
//! let request = LlmRequest::new("Hello, world!", "llama3.2");
//! let response = client.complete(&request).await?;
//! println!("{}", response.content);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod factory;
mod lines;
pub mod providers;
pub mod types;

pub use client::{
    collect_stream, LlmClient, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, LlmUsage,
};
pub use factory::{create_client, ClientOptions};
pub use providers::{OllamaClient, OpenAiClient};
pub use types::ProviderType;

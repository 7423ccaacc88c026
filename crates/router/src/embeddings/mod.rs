//! Query and document embedding.
//!
//! The router only needs `embed` for the query; `embed_batch` is used when
//! the CLI builds its in-memory index from a local corpus.

pub mod config;
pub mod provider;
pub mod providers;

pub use config::EmbeddingConfig;
pub use provider::{create_provider, EmbeddingProvider};

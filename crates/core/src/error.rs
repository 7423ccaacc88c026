//! Error types shared by every Enclave crate.

use std::time::Duration;

use thiserror::Error;

/// Unified error type.
///
/// Library code returns `Result<T, AppError>` and propagates with `?`.
/// Messages here may contain backend detail and are meant for logs; the
/// router only ever shows callers templated text.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// LLM provider errors
    #[error("LLM error: {0}")]
    Llm(String),

    /// Identity store errors
    #[error("Identity error: {0}")]
    Identity(String),

    /// Embedding, index, lexical search and rerank errors
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Prompt system errors
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// Rejected input (empty query, missing identity)
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An external call exceeded its deadline
    #[error("{operation} timed out after {}ms", .elapsed.as_millis())]
    Timeout {
        operation: String,
        elapsed: Duration,
    },

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl AppError {
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        AppError::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, AppError::Timeout { .. })
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = AppError::timeout("vector search", Duration::from_millis(1500));
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "vector search timed out after 1500ms");
    }

    #[test]
    fn test_serde_conversion() {
        let err: AppError = serde_json::from_str::<serde_json::Value>("{oops")
            .unwrap_err()
            .into();
        assert!(matches!(err, AppError::Serialization(_)));
    }
}

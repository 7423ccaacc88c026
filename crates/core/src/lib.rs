//! Enclave core library.
//!
//! Shared foundations for the query router and its CLI:
//! - Error handling (`AppError`, `AppResult`)
//! - Logging infrastructure
//! - Configuration loading (`.enclave/config.yaml` + environment)

pub mod config;
pub mod error;
pub mod logging;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

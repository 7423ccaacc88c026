//! Prompt definitions and rendering for Enclave.
//!
//! Prompts are YAML documents holding a Handlebars template plus sampling
//! parameters. The crate ships built-in definitions for every prompt the
//! router uses; a workspace can override any of them by placing
//! `.enclave/prompts/<id>.yml` next to its config.

pub mod builder;
mod builtin;
pub mod library;
pub mod loader;
pub mod types;

pub use builder::{build_prompt, render_template};
pub use library::PromptLibrary;
pub use loader::{list_prompts, load_prompt};
pub use types::{BuiltPrompt, PromptDefinition, PromptOrigin, PromptOutputSpec, PromptParams};

/// Identifiers of the prompts the router renders.
pub mod ids {
    pub const INTENT_CLASSIFY: &str = "intent.classify";
    pub const ANSWER_GROUNDED: &str = "answer.grounded";
    pub const ANSWER_GENERAL: &str = "answer.general";
    pub const QUERY_REPHRASE: &str = "query.rephrase";
}

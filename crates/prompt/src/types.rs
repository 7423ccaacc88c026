//! Prompt domain types.

use serde::{Deserialize, Serialize};

/// A prompt definition, either built in or loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDefinition {
    /// Unique prompt identifier (e.g. `intent.classify`)
    pub id: String,

    pub title: String,

    /// Schema version, `x.y`
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Optional system message, also a Handlebars template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// User message template
    pub template: String,

    #[serde(default)]
    pub params: PromptParams,

    #[serde(default)]
    pub output: PromptOutputSpec,
}

/// Sampling parameters that travel with a prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(rename = "maxTokens", default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Output specification for the prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptOutputSpec {
    /// "text", "markdown" or "json"
    pub format: String,
}

impl Default for PromptOutputSpec {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
        }
    }
}

/// Where a definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptOrigin {
    BuiltIn,
    Workspace,
}

/// A rendered prompt ready for the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltPrompt {
    pub system: Option<String>,
    pub user: String,
    pub params: PromptParams,
    #[serde(rename = "sourcePromptId")]
    pub source_prompt_id: String,
}

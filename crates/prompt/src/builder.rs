//! Template rendering.

use crate::types::{BuiltPrompt, PromptDefinition};
use enclave_core::{AppError, AppResult};
use handlebars::Handlebars;
use serde::Serialize;

/// Render a definition's system and user templates against `variables`.
///
/// ```no_run
/// use enclave_prompt::{build_prompt, PromptDefinition};
/// use serde_json::json;
///
/// # fn example(def: PromptDefinition) -> Result<(), Box<dyn std::error::Error>> {
/// let built = build_prompt(&def, &json!({ "query": "What is the travel policy?" }))?;
/// println!("{}", built.user);
/// # Ok(())
/// # }
/// ```
pub fn build_prompt<T: Serialize>(
    definition: &PromptDefinition,
    variables: &T,
) -> AppResult<BuiltPrompt> {
    tracing::debug!(prompt = %definition.id, "Building prompt");

    let system = definition
        .system
        .as_deref()
        .map(|s| render_template(s, variables))
        .transpose()?
        .map(|s| s.trim().to_string());

    let user = render_template(&definition.template, variables)?;

    Ok(BuiltPrompt {
        system,
        user,
        params: definition.params.clone(),
        source_prompt_id: definition.id.clone(),
    })
}

/// Render one Handlebars template. Escaping is off: output goes to a model,
/// not a browser. Missing variables render as empty strings.
pub fn render_template<T: Serialize>(template: &str, variables: &T) -> AppResult<String> {
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(handlebars::no_escape);

    handlebars
        .register_template_string("prompt", template)
        .map_err(|e| AppError::Prompt(format!("Failed to register template: {}", e)))?;

    handlebars
        .render("prompt", variables)
        .map_err(|e| AppError::Prompt(format!("Failed to render template: {}", e)))
}

/// Check that a template parses, without rendering it.
pub(crate) fn check_template(template: &str) -> AppResult<()> {
    let mut handlebars = Handlebars::new();
    handlebars
        .register_template_string("check", template)
        .map_err(|e| AppError::Prompt(format!("Invalid template: {}", e)))
}

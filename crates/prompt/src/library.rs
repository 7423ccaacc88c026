//! The set of prompts a running router renders from.

use std::collections::HashMap;
use std::path::Path;

use crate::builder::build_prompt;
use crate::builtin::builtin_definitions;
use crate::loader::{list_prompts, load_prompt};
use crate::types::{BuiltPrompt, PromptDefinition, PromptOrigin};
use enclave_core::{AppError, AppResult};
use serde::Serialize;

/// Immutable prompt registry, built once at startup and shared.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    prompts: HashMap<String, (PromptDefinition, PromptOrigin)>,
}

impl PromptLibrary {
    /// Library holding only the compiled-in prompts.
    pub fn builtin() -> AppResult<Self> {
        let prompts = builtin_definitions()?
            .into_iter()
            .map(|def| (def.id.clone(), (def, PromptOrigin::BuiltIn)))
            .collect();
        Ok(Self { prompts })
    }

    /// Built-in prompts, overridden by any `.enclave/prompts/<id>.yml` found in
    /// the workspace. A malformed override is an error rather than a silent
    /// fallback.
    pub fn load(workspace_path: &Path) -> AppResult<Self> {
        let mut library = Self::builtin()?;
        for id in list_prompts(workspace_path)? {
            let def = load_prompt(workspace_path, &id)?;
            library.insert(def, PromptOrigin::Workspace);
        }
        Ok(library)
    }

    pub fn insert(&mut self, definition: PromptDefinition, origin: PromptOrigin) {
        self.prompts
            .insert(definition.id.clone(), (definition, origin));
    }

    pub fn get(&self, id: &str) -> Option<&PromptDefinition> {
        self.prompts.get(id).map(|(def, _)| def)
    }

    pub fn origin(&self, id: &str) -> Option<PromptOrigin> {
        self.prompts.get(id).map(|(_, origin)| *origin)
    }

    /// Render prompt `id` against `variables`.
    pub fn render<T: Serialize>(&self, id: &str, variables: &T) -> AppResult<BuiltPrompt> {
        let def = self
            .get(id)
            .ok_or_else(|| AppError::Prompt(format!("Unknown prompt: {}", id)))?;
        build_prompt(def, variables)
    }
}

//! Prompt definitions compiled into the binary.

use crate::types::PromptDefinition;
use enclave_core::{AppError, AppResult};

const SOURCES: &[(&str, &str)] = &[
    (
        crate::ids::INTENT_CLASSIFY,
        include_str!("../prompts/intent.classify.yml"),
    ),
    (
        crate::ids::ANSWER_GROUNDED,
        include_str!("../prompts/answer.grounded.yml"),
    ),
    (
        crate::ids::ANSWER_GENERAL,
        include_str!("../prompts/answer.general.yml"),
    ),
    (
        crate::ids::QUERY_REPHRASE,
        include_str!("../prompts/query.rephrase.yml"),
    ),
];

pub(crate) fn builtin_definitions() -> AppResult<Vec<PromptDefinition>> {
    SOURCES
        .iter()
        .map(|(id, yaml)| {
            serde_yaml::from_str::<PromptDefinition>(yaml).map_err(|e| {
                AppError::Prompt(format!("Built-in prompt {} is malformed: {}", id, e))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_parse_and_match_ids() {
        let defs = builtin_definitions().unwrap();
        assert_eq!(defs.len(), SOURCES.len());
        for (def, (id, _)) in defs.iter().zip(SOURCES) {
            assert_eq!(def.id, *id);
            crate::loader::validate_prompt(def).unwrap();
        }
    }

    #[test]
    fn test_intent_prompt_parameters() {
        let defs = builtin_definitions().unwrap();
        let intent = defs
            .iter()
            .find(|d| d.id == crate::ids::INTENT_CLASSIFY)
            .unwrap();
        assert_eq!(intent.params.temperature, Some(0.1));
        assert_eq!(intent.params.max_tokens, Some(500));
    }
}

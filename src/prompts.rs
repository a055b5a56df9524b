// src/prompts.rs
// YAML prompt loading
//
// Prompts live in a YAML file so support staff can tune wording without
// a rebuild. The compiled-in copy is the fallback when no override path
// is configured or the file is unreadable.

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{AgentError, Result};

const EMBEDDED_PROMPTS: &str = include_str!("../prompts/agent.yaml");

/// The prompt set used by the pipeline.
///
/// `response_generator` takes `{conversation_context}`, `{context}` and
/// `{query}` placeholders.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptSet {
    pub system: String,
    pub response_generator: String,
    pub greeting: String,
}

impl PromptSet {
    /// Load from an optional override path, falling back to the embedded file
    pub fn load(path: Option<&str>) -> Result<Self> {
        if let Some(path) = path {
            match std::fs::read_to_string(path) {
                Ok(raw) => {
                    let prompts = Self::parse(&raw)?;
                    info!(path, "Loaded prompt overrides");
                    return Ok(prompts);
                }
                Err(e) => {
                    warn!(path, error = %e, "Cannot read prompt file, using embedded prompts");
                }
            }
        }
        Self::parse(EMBEDDED_PROMPTS)
    }

    fn parse(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| AgentError::Config(format!("invalid prompt file: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_prompts_parse() {
        let prompts = PromptSet::load(None).unwrap();
        assert!(prompts.response_generator.contains("{query}"));
        assert!(prompts.response_generator.contains("{context}"));
        assert!(prompts.response_generator.contains("{conversation_context}"));
        assert!(prompts.greeting.starts_with("Hello!"));
    }

    #[test]
    fn test_missing_override_falls_back() {
        let prompts = PromptSet::load(Some("/nonexistent/prompts.yaml")).unwrap();
        assert!(!prompts.system.is_empty());
    }
}

//! LLM model registry: which models exist, who serves them, and where each
//! one falls back when it fails.
//!
//! The registry is declared in a small YAML document so deployments can swap
//! models without recompiling:
//!
//! ```yaml
//! default_models:
//!   router: gpt-4.1-mini
//!   extraction: gpt-4.1-mini
//!   summarizer: gpt-4.1-nano
//! models:
//!   gpt-4.1-mini:
//!     provider: openai
//!     token_limit: 128000
//!     is_vision_capable: true
//!     fallback: claude-sonnet-4
//!   claude-sonnet-4:
//!     provider: anthropic
//!     token_limit: 200000
//!     is_vision_capable: true
//!     fallback: null
//! ```
//!
//! Everything is validated once, at load time: every referenced id must
//! exist, the fallback graph must be acyclic, and any task that sends page
//! images must be assigned a vision-capable model. Validating here means the
//! fallback walker in [`crate::llm`] can treat the chain as a plain finite
//! list and never re-check.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ExtractError;

/// An LLM API provider. Determines the wire format and the credential
/// environment variable used by [`crate::llm::HttpLlmClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Gemini,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
        }
    }

    /// Name of the environment variable holding this provider's API key.
    pub fn credential_var(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
        }
    }
}

/// Capabilities and fallback link for a single model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub provider: Provider,
    pub token_limit: u32,
    pub is_vision_capable: bool,
    /// Next model to try when this one fails terminally. `None` ends the chain.
    #[serde(default)]
    pub fallback: Option<String>,
}

/// The model assigned to each pipeline task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultModels {
    pub router: String,
    pub extraction: String,
    pub summarizer: String,
}

/// The validated set of known models plus per-task defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRegistry {
    pub default_models: DefaultModels,
    pub models: HashMap<String, ModelSpec>,
}

impl ModelRegistry {
    /// Parse and validate a registry from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, ExtractError> {
        let registry: ModelRegistry = serde_yaml::from_str(text)
            .map_err(|e| ExtractError::InvalidModelConfig(format!("YAML parse error: {e}")))?;
        registry.validate()?;
        Ok(registry)
    }

    /// Load and validate a registry from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ExtractError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ExtractError::InvalidModelConfig(format!(
                "cannot read model config '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_yaml(&text)
    }

    /// A registry that works without any YAML on disk.
    ///
    /// Mirrors the models the CLI help text advertises; router and
    /// extraction chains end in Gemini so a single configured provider is
    /// enough to run.
    pub fn builtin() -> Self {
        let mut models = HashMap::new();
        models.insert(
            "gpt-4.1-mini".to_string(),
            ModelSpec {
                provider: Provider::OpenAi,
                token_limit: 128_000,
                is_vision_capable: true,
                fallback: Some("claude-sonnet-4".to_string()),
            },
        );
        models.insert(
            "claude-sonnet-4".to_string(),
            ModelSpec {
                provider: Provider::Anthropic,
                token_limit: 200_000,
                is_vision_capable: true,
                fallback: Some("gemini-2.5-flash".to_string()),
            },
        );
        models.insert(
            "gemini-2.5-flash".to_string(),
            ModelSpec {
                provider: Provider::Gemini,
                token_limit: 1_000_000,
                is_vision_capable: true,
                fallback: None,
            },
        );
        models.insert(
            "gpt-4.1-nano".to_string(),
            ModelSpec {
                provider: Provider::OpenAi,
                token_limit: 128_000,
                is_vision_capable: true,
                fallback: Some("gemini-2.5-flash".to_string()),
            },
        );
        let registry = Self {
            default_models: DefaultModels {
                router: "gpt-4.1-mini".to_string(),
                extraction: "gpt-4.1-mini".to_string(),
                summarizer: "gpt-4.1-nano".to_string(),
            },
            models,
        };
        debug_assert!(registry.validate().is_ok());
        registry
    }

    /// Look up the spec for a model id.
    pub fn get(&self, id: &str) -> Option<&ModelSpec> {
        self.models.get(id)
    }

    /// The fallback chain starting at `id`, the model itself first.
    ///
    /// Returns an empty vector for an unknown id. The walk keeps a seen-set
    /// even though `validate` already rejected cycles, so the result is a
    /// finite acyclic list no matter what.
    pub fn chain(&self, id: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(id.to_string());
        while let Some(model_id) = current {
            if !seen.insert(model_id.clone()) {
                break;
            }
            match self.models.get(&model_id) {
                Some(spec) => {
                    current = spec.fallback.clone();
                    chain.push(model_id);
                }
                None => break,
            }
        }
        chain
    }

    fn validate(&self) -> Result<(), ExtractError> {
        // Defaults must exist; image-sending tasks need vision models.
        for (task, id, needs_vision) in [
            ("router", &self.default_models.router, true),
            ("extraction", &self.default_models.extraction, true),
            ("summarizer", &self.default_models.summarizer, false),
        ] {
            let spec = self.models.get(id).ok_or_else(|| {
                ExtractError::InvalidModelConfig(format!(
                    "default {task} model '{id}' is not declared under models:"
                ))
            })?;
            if needs_vision && !spec.is_vision_capable {
                return Err(ExtractError::InvalidModelConfig(format!(
                    "default {task} model '{id}' must be vision-capable"
                )));
            }
        }

        // Every fallback reference must resolve.
        for (id, spec) in &self.models {
            if let Some(fb) = &spec.fallback {
                if !self.models.contains_key(fb) {
                    return Err(ExtractError::InvalidModelConfig(format!(
                        "model '{id}' falls back to undeclared model '{fb}'"
                    )));
                }
            }
        }

        // The fallback graph must be acyclic from every starting point.
        for id in self.models.keys() {
            let mut seen = HashSet::new();
            let mut current = Some(id.clone());
            while let Some(model_id) = current {
                if !seen.insert(model_id.clone()) {
                    return Err(ExtractError::InvalidModelConfig(format!(
                        "fallback cycle reachable from '{id}' (revisits '{model_id}')"
                    )));
                }
                current = self
                    .models
                    .get(&model_id)
                    .and_then(|spec| spec.fallback.clone());
            }
        }

        Ok(())
    }
}

//! Centralized model definitions
//!
//! Every model the server can talk to is declared here once; the registry
//! instantiates whichever ones the configuration has credentials for.

use super::gemini::{GeminiModel, GeminiService};
use super::LlmService;
use std::sync::Arc;

/// LLM provider enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Gemini,
}

impl Provider {
    pub fn display_name(self) -> &'static str {
        match self {
            Provider::Gemini => "Google Gemini",
        }
    }

    pub fn api_key_env_var(self) -> &'static str {
        match self {
            Provider::Gemini => "GEMINI_API_KEY",
        }
    }
}

/// Model definition with metadata
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// User-facing model ID (e.g., "gemini-2.5-flash")
    pub id: &'static str,
    pub provider: Provider,
    pub description: &'static str,
    /// Context window size in tokens
    pub context_window: usize,
    /// Cheap enough for auxiliary calls such as titles
    pub auxiliary: bool,
    /// Factory function to create the service
    pub factory: fn(&str, Option<&str>) -> Result<Arc<dyn LlmService>, String>,
}

fn gemini_factory(
    model: GeminiModel,
    api_key: &str,
    gateway: Option<&str>,
) -> Result<Arc<dyn LlmService>, String> {
    if api_key.is_empty() {
        return Err(format!(
            "{} requires {} or a gateway",
            model.api_name(),
            Provider::Gemini.api_key_env_var()
        ));
    }
    let service = GeminiService::new(api_key.to_string(), model, gateway).map_err(|e| e.message)?;
    Ok(Arc::new(service))
}

/// Get all available model definitions
pub fn all_models() -> &'static [ModelDef] {
    &[
        ModelDef {
            id: "gemini-2.5-flash",
            provider: Provider::Gemini,
            description: "Gemini 2.5 Flash (fast, balanced)",
            context_window: 1_048_576,
            auxiliary: false,
            factory: |api_key, gateway| gemini_factory(GeminiModel::Gemini25Flash, api_key, gateway),
        },
        ModelDef {
            id: "gemini-2.5-pro",
            provider: Provider::Gemini,
            description: "Gemini 2.5 Pro (most capable, slower)",
            context_window: 1_048_576,
            auxiliary: false,
            factory: |api_key, gateway| gemini_factory(GeminiModel::Gemini25Pro, api_key, gateway),
        },
        ModelDef {
            id: "gemini-2.5-flash-lite",
            provider: Provider::Gemini,
            description: "Gemini 2.5 Flash-Lite (cheapest, for short tasks)",
            context_window: 1_048_576,
            auxiliary: true,
            factory: |api_key, gateway| {
                gemini_factory(GeminiModel::Gemini25FlashLite, api_key, gateway)
            },
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_ids_match_api_names() {
        for def in all_models() {
            let service = (def.factory)("key", None).unwrap();
            assert_eq!(service.model_id(), def.id);
        }
    }

    #[test]
    fn test_empty_key_rejected() {
        let def = &all_models()[0];
        let err = (def.factory)("", None).err().unwrap();
        assert!(err.contains("GEMINI_API_KEY"));
    }
}

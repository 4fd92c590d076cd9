//! Static Claude catalog shared by the direct and proxy backends.

use crate::types::{LlmModel, LlmModelProvider};

pub const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

struct CatalogEntry {
    name: &'static str,
    display_name: &'static str,
    api_id: &'static str,
    bedrock_id: &'static str,
    /// Accepts an extended-thinking budget.
    supports_reasoning: bool,
}

const CLAUDE_MODELS: &[CatalogEntry] = &[
    CatalogEntry {
        name: "claude-3-haiku",
        display_name: "Claude 3 Haiku",
        api_id: "claude-3-haiku-20240307",
        bedrock_id: "anthropic.claude-3-haiku-20240307-v1:0",
        supports_reasoning: false,
    },
    CatalogEntry {
        name: "claude-3-sonnet",
        display_name: "Claude 3 Sonnet",
        api_id: "claude-3-sonnet-20240229",
        bedrock_id: "anthropic.claude-3-sonnet-20240229-v1:0",
        supports_reasoning: false,
    },
    CatalogEntry {
        name: "claude-3-opus",
        display_name: "Claude 3 Opus",
        api_id: "claude-3-opus-20240229",
        bedrock_id: "anthropic.claude-3-opus-20240229-v1:0",
        supports_reasoning: false,
    },
    CatalogEntry {
        name: "claude-3.5-haiku",
        display_name: "Claude 3.5 Haiku",
        api_id: "claude-3-5-haiku-20241022",
        bedrock_id: "anthropic.claude-3-5-haiku-20241022-v1:0",
        supports_reasoning: false,
    },
    CatalogEntry {
        name: "claude-3.5-sonnet",
        display_name: "Claude 3.5 Sonnet",
        api_id: "claude-3-5-sonnet-20241022",
        bedrock_id: "anthropic.claude-3-5-sonnet-20241022-v2:0",
        supports_reasoning: false,
    },
    CatalogEntry {
        name: "claude-3.7-sonnet",
        display_name: "Claude 3.7 Sonnet",
        api_id: "claude-3-7-sonnet-20250219",
        bedrock_id: "anthropic.claude-3-7-sonnet-20250219-v1:0",
        supports_reasoning: true,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CatalogFlavor {
    AnthropicApi,
    Bedrock,
}

pub(crate) fn claude_catalog(flavor: CatalogFlavor) -> Vec<LlmModel> {
    let provider = match flavor {
        CatalogFlavor::AnthropicApi => LlmModelProvider {
            id: Some("anthropic".to_string()),
            provider_name: Some("Anthropic".to_string()),
            provider_type: Some("anthropic".to_string()),
        },
        CatalogFlavor::Bedrock => LlmModelProvider {
            id: Some("bedrock".to_string()),
            provider_name: Some("AWS Bedrock".to_string()),
            provider_type: Some("aws".to_string()),
        },
    };

    CLAUDE_MODELS
        .iter()
        .map(|e| LlmModel {
            name: e.name.to_string(),
            display_name: e.display_name.to_string(),
            available: true,
            model_id: Some(match flavor {
                CatalogFlavor::AnthropicApi => e.api_id.to_string(),
                CatalogFlavor::Bedrock => e.bedrock_id.to_string(),
            }),
            anthropic_version: match flavor {
                CatalogFlavor::AnthropicApi => None,
                CatalogFlavor::Bedrock => Some(BEDROCK_ANTHROPIC_VERSION.to_string()),
            },
            provider: provider.clone(),
        })
        .collect()
}

/// Model id for the Anthropic API; unknown names pass through unchanged.
pub(crate) fn anthropic_model_id(name: &str) -> String {
    CLAUDE_MODELS
        .iter()
        .find(|e| e.name == name)
        .map(|e| e.api_id.to_string())
        .unwrap_or_else(|| name.to_string())
}

/// Bedrock model id; unknown names pass through unchanged.
pub(crate) fn bedrock_model_id(name: &str) -> String {
    CLAUDE_MODELS
        .iter()
        .find(|e| e.name == name)
        .map(|e| e.bedrock_id.to_string())
        .unwrap_or_else(|| name.to_string())
}

/// Whether the model accepts a thinking budget. Catalog names and both id
/// flavors are recognized; anything else is treated as unsupported.
pub fn supports_reasoning(model: &str) -> bool {
    CLAUDE_MODELS
        .iter()
        .find(|e| e.name == model || e.api_id == model || e.bedrock_id == model)
        .is_some_and(|e| e.supports_reasoning)
}

pub fn is_vision_model(model: &str) -> bool {
    const VISION_MARKERS: &[&str] = &[
        "vision",
        "claude-3",
        "claude-sonnet-4",
        "claude-opus-4",
        "gpt-4o",
        "gpt-4-turbo",
        "gemini-1.5",
        "gemini-2",
    ];
    let m = model.to_ascii_lowercase();
    VISION_MARKERS.iter().any(|marker| m.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_flavors_carry_their_ids() {
        let api = claude_catalog(CatalogFlavor::AnthropicApi);
        let bedrock = claude_catalog(CatalogFlavor::Bedrock);
        assert_eq!(api.len(), bedrock.len());
        assert!(api.iter().all(|m| m.anthropic_version.is_none()));
        assert!(
            bedrock
                .iter()
                .all(|m| m.model_id.as_deref().is_some_and(|id| id.starts_with("anthropic.")))
        );
    }

    #[test]
    fn model_ids_resolve_or_pass_through() {
        assert_eq!(anthropic_model_id("claude-3-haiku"), "claude-3-haiku-20240307");
        assert_eq!(
            bedrock_model_id("claude-3.7-sonnet"),
            "anthropic.claude-3-7-sonnet-20250219-v1:0"
        );
        assert_eq!(anthropic_model_id("claude-custom"), "claude-custom");
        assert_eq!(bedrock_model_id("us.anthropic.x"), "us.anthropic.x");
    }

    #[test]
    fn only_thinking_models_support_reasoning() {
        assert!(supports_reasoning("claude-3.7-sonnet"));
        assert!(supports_reasoning("claude-3-7-sonnet-20250219"));
        assert!(supports_reasoning("anthropic.claude-3-7-sonnet-20250219-v1:0"));
        assert!(!supports_reasoning("claude-3-haiku"));
        assert!(!supports_reasoning("claude-3.5-sonnet"));
        assert!(!supports_reasoning("gpt-4o"));
    }

    #[test]
    fn vision_detection() {
        assert!(is_vision_model("claude-3-sonnet"));
        assert!(is_vision_model("gpt-4o-mini"));
        assert!(!is_vision_model("gpt-3.5-turbo"));
    }
}

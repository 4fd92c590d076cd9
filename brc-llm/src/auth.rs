//! Request header construction from stored credentials.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_ACCESS_CODE_PREFIX: &str = "nk-";

/// Service a request is authenticated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceProvider {
    #[default]
    OpenAi,
    Azure,
    Anthropic,
    Google,
    Proxy,
}

/// Snapshot of the credential store. Read-only from this crate's perspective.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Service the OpenAI-compatible backend talks to (OpenAI or Azure).
    #[serde(default)]
    pub service_provider: ServiceProvider,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub azure_api_key: Option<String>,
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    #[serde(default)]
    pub google_api_key: Option<String>,
    #[serde(default)]
    pub proxy_api_key: Option<String>,
    #[serde(default)]
    pub access_code: Option<String>,
    #[serde(default)]
    pub access_control_enabled: bool,
    #[serde(default)]
    pub access_code_prefix: Option<String>,
    #[serde(default)]
    pub use_proxy: bool,
}

impl AccessConfig {
    pub fn api_key(&self, provider: ServiceProvider) -> Option<&str> {
        let key = match provider {
            ServiceProvider::OpenAi => &self.openai_api_key,
            ServiceProvider::Azure => &self.azure_api_key,
            ServiceProvider::Anthropic => &self.anthropic_api_key,
            ServiceProvider::Google => &self.google_api_key,
            ServiceProvider::Proxy => &self.proxy_api_key,
        };
        key.as_deref().filter(|k| !k.trim().is_empty())
    }

    fn access_code(&self) -> Option<&str> {
        if !self.access_control_enabled {
            return None;
        }
        self.access_code
            .as_deref()
            .filter(|c| !c.trim().is_empty())
    }
}

/// What a request is for: the service it hits and the model it names.
#[derive(Debug, Clone)]
pub struct AuthTarget<'a> {
    pub provider: ServiceProvider,
    pub model: &'a str,
    pub session_id: &'a str,
    /// Running inside the packaged desktop app, which injects some
    /// credentials itself.
    pub is_app: bool,
}

pub fn auth_header_name(provider: ServiceProvider) -> &'static str {
    match provider {
        ServiceProvider::Azure => "api-key",
        ServiceProvider::Anthropic => "x-api-key",
        _ => "Authorization",
    }
}

pub fn build_headers(access: &AccessConfig, target: &AuthTarget<'_>) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    headers.insert("Accept".to_string(), "application/json".to_string());
    headers.insert("Session-Id".to_string(), target.session_id.to_string());

    let is_google = target.model.starts_with("gemini");
    if is_google && target.is_app {
        tracing::debug!(model = %target.model, "packaged app supplies google credentials; omitting auth header");
        return headers;
    }

    // Header name follows the service; only the key switches for gemini models.
    let header_name = auth_header_name(target.provider);
    let key_provider = if is_google {
        ServiceProvider::Google
    } else {
        target.provider
    };

    let credential = match access.api_key(key_provider) {
        Some(key) => Some(key.trim().to_string()),
        None => access.access_code().map(|code| {
            let prefix = access
                .access_code_prefix
                .as_deref()
                .unwrap_or(DEFAULT_ACCESS_CODE_PREFIX);
            format!("{prefix}{}", code.trim())
        }),
    };

    match credential {
        Some(value) if header_name == "Authorization" => {
            headers.insert(header_name.to_string(), format!("Bearer {value}"));
        }
        Some(value) => {
            headers.insert(header_name.to_string(), value);
        }
        None => {
            tracing::debug!(provider = ?key_provider, "no credential available; sending unauthenticated request");
        }
    }

    headers
}

pub(crate) fn apply_headers(
    mut req: reqwest::RequestBuilder,
    headers: &BTreeMap<String, String>,
) -> reqwest::RequestBuilder {
    for (name, value) in headers {
        req = req.header(name.as_str(), value.as_str());
    }
    req
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(provider: ServiceProvider, model: &'static str) -> AuthTarget<'static> {
        AuthTarget {
            provider,
            model,
            session_id: "session-1",
            is_app: false,
        }
    }

    #[test]
    fn azure_uses_vendor_header_without_bearer_prefix() {
        let access = AccessConfig {
            azure_api_key: Some("X".to_string()),
            ..AccessConfig::default()
        };
        let headers = build_headers(&access, &target(ServiceProvider::Azure, "gpt-4"));
        assert_eq!(headers.get("api-key").map(String::as_str), Some("X"));
        assert!(!headers.contains_key("Authorization"));
    }

    #[test]
    fn default_provider_uses_bearer_authorization() {
        let access = AccessConfig {
            openai_api_key: Some("X".to_string()),
            ..AccessConfig::default()
        };
        let headers = build_headers(&access, &target(ServiceProvider::OpenAi, "gpt-4"));
        assert_eq!(
            headers.get("Authorization").map(String::as_str),
            Some("Bearer X")
        );
        assert_eq!(
            headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(headers.get("Accept").map(String::as_str), Some("application/json"));
        assert_eq!(headers.get("Session-Id").map(String::as_str), Some("session-1"));
    }

    #[test]
    fn access_code_fallback_is_prefixed_and_trimmed() {
        let access = AccessConfig {
            access_code: Some("  abc ".to_string()),
            access_control_enabled: true,
            access_code_prefix: Some("PFX-".to_string()),
            ..AccessConfig::default()
        };
        let bearer = build_headers(&access, &target(ServiceProvider::OpenAi, "gpt-4"));
        assert_eq!(
            bearer.get("Authorization").map(String::as_str),
            Some("Bearer PFX-abc")
        );

        let vendor = build_headers(&access, &target(ServiceProvider::Azure, "gpt-4"));
        assert_eq!(vendor.get("api-key").map(String::as_str), Some("PFX-abc"));
    }

    #[test]
    fn access_code_ignored_when_access_control_disabled() {
        let access = AccessConfig {
            access_code: Some("abc".to_string()),
            access_control_enabled: false,
            ..AccessConfig::default()
        };
        let headers = build_headers(&access, &target(ServiceProvider::OpenAi, "gpt-4"));
        assert!(!headers.contains_key("Authorization"));
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn user_key_wins_over_access_code() {
        let access = AccessConfig {
            openai_api_key: Some("user-key".to_string()),
            access_code: Some("abc".to_string()),
            access_control_enabled: true,
            ..AccessConfig::default()
        };
        let headers = build_headers(&access, &target(ServiceProvider::OpenAi, "gpt-4"));
        assert_eq!(
            headers.get("Authorization").map(String::as_str),
            Some("Bearer user-key")
        );
    }

    #[test]
    fn gemini_models_use_google_key_and_skip_auth_in_app() {
        let access = AccessConfig {
            google_api_key: Some("g-key".to_string()),
            openai_api_key: Some("o-key".to_string()),
            ..AccessConfig::default()
        };
        let web = build_headers(&access, &target(ServiceProvider::OpenAi, "gemini-pro"));
        assert_eq!(
            web.get("Authorization").map(String::as_str),
            Some("Bearer g-key")
        );

        let app = build_headers(
            &access,
            &AuthTarget {
                is_app: true,
                ..target(ServiceProvider::OpenAi, "gemini-pro")
            },
        );
        assert!(!app.contains_key("Authorization"));
        assert_eq!(app.get("Session-Id").map(String::as_str), Some("session-1"));
    }

    #[test]
    fn gemini_model_under_azure_keeps_vendor_header() {
        let access = AccessConfig {
            google_api_key: Some("g-key".to_string()),
            azure_api_key: Some("a-key".to_string()),
            ..AccessConfig::default()
        };
        let headers = build_headers(&access, &target(ServiceProvider::Azure, "gemini-pro"));
        assert_eq!(headers.get("api-key").map(String::as_str), Some("g-key"));
        assert!(!headers.contains_key("Authorization"));
    }

    #[test]
    fn anthropic_uses_x_api_key() {
        let access = AccessConfig {
            anthropic_api_key: Some(" sk-ant ".to_string()),
            ..AccessConfig::default()
        };
        let headers = build_headers(&access, &target(ServiceProvider::Anthropic, "claude-3-sonnet"));
        assert_eq!(headers.get("x-api-key").map(String::as_str), Some("sk-ant"));
    }
}

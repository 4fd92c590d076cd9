//! brclient configuration loader.

use anyhow::Context;
use brc_llm::{AccessConfig, Endpoints, ModelConfig, Provider, ReasoningConfig, ShareConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrClientConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub endpoints: Endpoints,
    #[serde(default)]
    pub share: ShareConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Sent as `Session-Id`. A fresh id is generated per run when unset.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub is_app: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_provider() -> String {
    "claude".to_string()
}

fn default_model() -> String {
    "claude-3.5-sonnet".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            system_prompt: None,
            session_id: None,
            is_app: false,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSection {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default = "default_stream")]
    pub stream: bool,
    #[serde(default)]
    pub reasoning_budget_tokens: Option<u32>,
}

fn default_stream() -> bool {
    true
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            temperature: None,
            top_p: None,
            max_tokens: None,
            presence_penalty: None,
            frequency_penalty: None,
            stream: default_stream(),
            reasoning_budget_tokens: None,
        }
    }
}

impl BrClientConfig {
    /// Load from `path`, or from the default location when `None`. A missing
    /// default file is not an error; an explicitly named one is.
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let explicit = path.is_some();
        let path = path.unwrap_or_else(default_config_path);

        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Self::parse(&contents)
                .with_context(|| format!("parse config {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!("read config {}: {e}", path.display()));
            }
        };

        cfg.apply_overrides(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply environment-style overrides. Blank values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("BRCLIENT_PROVIDER") {
            self.general.provider = v;
        }
        if let Some(v) = get("BRCLIENT_MODEL") {
            self.general.model = v;
        }
        if let Some(v) = get("ANTHROPIC_API_KEY") {
            self.access.anthropic_api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.access.openai_api_key = Some(v);
        }
        if let Some(v) = get("AZURE_API_KEY") {
            self.access.azure_api_key = Some(v);
        }
        if let Some(v) = get("GOOGLE_API_KEY") {
            self.access.google_api_key = Some(v);
        }
        if let Some(v) = get("BRCLIENT_PROXY_URL") {
            self.endpoints.proxy = Some(v);
            self.access.use_proxy = true;
        }
        if let Some(v) = get("BRCLIENT_PROXY_API_KEY") {
            self.access.proxy_api_key = Some(v);
        }
        if let Some(v) = get("BRCLIENT_ACCESS_CODE") {
            self.access.access_code = Some(v);
            self.access.access_control_enabled = true;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.general.model.trim().is_empty() {
            return Err(anyhow::anyhow!("general.model is required"));
        }
        self.provider()?;
        if self.general.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("general.request_timeout_secs must be > 0"));
        }
        if self.access.use_proxy
            && self
                .endpoints
                .proxy
                .as_deref()
                .is_none_or(|p| p.trim().is_empty())
        {
            return Err(anyhow::anyhow!(
                "access.use_proxy is set but endpoints.proxy is empty"
            ));
        }
        Ok(())
    }

    pub fn provider(&self) -> anyhow::Result<Provider> {
        self.general
            .provider
            .parse::<Provider>()
            .with_context(|| format!("general.provider = {:?}", self.general.provider))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.general.request_timeout_secs)
    }

    pub fn model_config(&self) -> ModelConfig {
        let m = &self.model;
        let mut config = ModelConfig::new(self.general.model.clone()).streaming(m.stream);
        config.temperature = m.temperature;
        config.top_p = m.top_p;
        config.max_tokens = m.max_tokens;
        config.presence_penalty = m.presence_penalty;
        config.frequency_penalty = m.frequency_penalty;
        config.reasoning = m
            .reasoning_budget_tokens
            .map(|budget_tokens| ReasoningConfig { budget_tokens });
        config
    }

    pub fn session_id(&self) -> String {
        self.general
            .session_id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}

pub fn config_root() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".brclient")
}

pub fn default_config_path() -> PathBuf {
    config_root().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use brc_llm::ServiceProvider;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = BrClientConfig::parse("").expect("parse");
        assert_eq!(cfg.general.provider, "claude");
        assert_eq!(cfg.general.request_timeout_secs, 300);
        assert!(cfg.model.stream);
        assert_eq!(cfg.endpoints, Endpoints::default());
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn sections_parse_into_library_types() {
        let cfg = BrClientConfig::parse(
            r#"
            [general]
            provider = "openai"
            model = "gpt-4o"

            [model]
            stream = false
            temperature = 0.2
            reasoning_budget_tokens = 512

            [access]
            service_provider = "azure"
            azure_api_key = "k"

            [endpoints]
            azure = "https://res.openai.azure.com"
            "#,
        )
        .expect("parse");

        assert_eq!(cfg.provider().expect("provider"), Provider::OpenAi);
        assert_eq!(cfg.access.service_provider, ServiceProvider::Azure);
        let model = cfg.model_config();
        assert_eq!(model.model, "gpt-4o");
        assert!(!model.stream);
        assert_eq!(model.temperature, Some(0.2));
        assert_eq!(model.reasoning.map(|r| r.budget_tokens), Some(512));
    }

    #[test]
    fn env_overrides_win_and_blank_values_are_ignored() {
        let mut cfg = BrClientConfig::default();
        cfg.apply_overrides(env(&[
            ("BRCLIENT_PROVIDER", "aws"),
            ("BRCLIENT_MODEL", "  "),
            ("BRCLIENT_PROXY_URL", "http://proxy.local"),
            ("BRCLIENT_ACCESS_CODE", "secret"),
        ]));

        assert_eq!(cfg.general.provider, "aws");
        assert_eq!(cfg.general.model, "claude-3.5-sonnet");
        assert!(cfg.access.use_proxy);
        assert_eq!(cfg.endpoints.proxy.as_deref(), Some("http://proxy.local"));
        assert!(cfg.access.access_control_enabled);
        cfg.validate().expect("valid");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = BrClientConfig::default();
        cfg.general.provider = "mistral".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = BrClientConfig::default();
        cfg.general.request_timeout_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = BrClientConfig::default();
        cfg.access.use_proxy = true;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn session_id_is_generated_when_unset() {
        let mut cfg = BrClientConfig::default();
        assert_ne!(cfg.session_id(), cfg.session_id());
        cfg.general.session_id = Some("fixed".to_string());
        assert_eq!(cfg.session_id(), "fixed");
    }

    #[tokio::test]
    async fn explicit_missing_path_is_an_error() {
        let path = std::env::temp_dir().join(format!("brclient-missing-{}.toml", Uuid::new_v4()));
        assert!(BrClientConfig::load(Some(path)).await.is_err());
    }
}

use crate::anthropic::AnthropicClient;
use crate::api::LlmApi;
use crate::auth::AccessConfig;
use crate::driver;
use crate::error::{LlmError, Result};
use crate::gemini::GeminiClient;
use crate::openai::OpenAiClient;
use crate::options::ChatOptions;
use crate::proxy::ProxyClient;
use crate::types::{LlmModel, LlmUsage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Model family a conversation is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Claude,
    Aws,
    OpenAi,
    Gemini,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Aws => "aws",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
        }
    }

    /// Best-effort guess from a model name. Unrecognized names map to OpenAI,
    /// which covers most OpenAI-compatible deployments.
    pub fn from_model(model: &str) -> Self {
        let m = model.to_ascii_lowercase();
        if m.starts_with("claude") {
            Self::Claude
        } else if m.starts_with("anthropic.") || m.contains(".anthropic.") {
            Self::Aws
        } else if m.starts_with("gemini") {
            Self::Gemini
        } else {
            Self::OpenAi
        }
    }
}

impl FromStr for Provider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" | "anthropic" => Ok(Self::Claude),
            "aws" | "bedrock" => Ok(Self::Aws),
            "openai" => Ok(Self::OpenAi),
            "gemini" | "google" => Ok(Self::Gemini),
            other => Err(LlmError::Configuration(format!(
                "unsupported provider: {other:?}"
            ))),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base URLs for every upstream the backends talk to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub anthropic: String,
    pub openai: String,
    /// Azure resource URL, e.g. `https://my-res.openai.azure.com`.
    pub azure: Option<String>,
    pub azure_api_version: String,
    /// Bedrock Converse proxy. Required when `use_proxy` is set.
    pub proxy: Option<String>,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            anthropic: "https://api.anthropic.com".to_string(),
            openai: "https://api.openai.com".to_string(),
            azure: None,
            azure_api_version: "2024-02-01".to_string(),
            proxy: None,
        }
    }
}

/// Everything a backend needs besides the request itself. Shared read-only
/// across requests.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub http: reqwest::Client,
    pub access: AccessConfig,
    pub endpoints: Endpoints,
    pub session_id: String,
    pub is_app: bool,
}

impl ClientContext {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(access: AccessConfig, endpoints: Endpoints, session_id: impl Into<String>) -> Self {
        // Connect timeout only; streams are bounded by `AbortHandle::abort_after`.
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });
        Self {
            http,
            access,
            endpoints,
            session_id: session_id.into(),
            is_app: false,
        }
    }

    pub fn with_http(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn packaged_app(mut self, is_app: bool) -> Self {
        self.is_app = is_app;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Direct,
    Proxy,
    OpenAi,
    Gemini,
}

/// The closed set of backends `select_backend` can produce.
#[derive(Clone)]
pub enum Backend {
    Direct(AnthropicClient),
    Proxy(ProxyClient),
    OpenAi(OpenAiClient),
    Gemini(GeminiClient),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Direct(_) => BackendKind::Direct,
            Self::Proxy(_) => BackendKind::Proxy,
            Self::OpenAi(_) => BackendKind::OpenAi,
            Self::Gemini(_) => BackendKind::Gemini,
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Backend").field(&self.kind()).finish()
    }
}

#[async_trait]
impl LlmApi for Backend {
    async fn chat(&self, options: ChatOptions) -> Result<()> {
        match self {
            Self::Direct(c) => driver::run_chat(c, options).await,
            Self::Proxy(c) => driver::run_chat(c, options).await,
            Self::OpenAi(c) => driver::run_chat(c, options).await,
            Self::Gemini(c) => driver::run_chat(c, options).await,
        }
    }

    async fn usage(&self) -> Result<LlmUsage> {
        match self {
            Self::Direct(c) => c.usage().await,
            Self::Proxy(c) => c.usage().await,
            Self::OpenAi(c) => c.usage().await,
            Self::Gemini(c) => c.usage().await,
        }
    }

    async fn models(&self) -> Result<Vec<LlmModel>> {
        match self {
            Self::Direct(c) => c.models().await,
            Self::Proxy(c) => c.models().await,
            Self::OpenAi(c) => c.models().await,
            Self::Gemini(c) => c.models().await,
        }
    }
}

/// Pick the backend for `provider`. Fails closed: a combination that has no
/// backend is a configuration error, never a silent default.
pub fn select_backend(provider: Provider, ctx: Arc<ClientContext>) -> Result<Backend> {
    let backend = match provider {
        Provider::Claude | Provider::Aws if ctx.access.use_proxy => {
            Backend::Proxy(ProxyClient::new(ctx)?)
        }
        Provider::Claude => Backend::Direct(AnthropicClient::new(ctx)),
        Provider::Aws => {
            return Err(LlmError::Configuration(
                "aws provider requires the bedrock proxy (set use_proxy)".to_string(),
            ));
        }
        Provider::OpenAi => Backend::OpenAi(OpenAiClient::new(ctx)?),
        Provider::Gemini => Backend::Gemini(GeminiClient::new()),
    };
    tracing::debug!(%provider, kind = ?backend.kind(), "selected backend");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(use_proxy: bool, proxy: Option<&str>) -> Arc<ClientContext> {
        let access = AccessConfig {
            use_proxy,
            ..AccessConfig::default()
        };
        let endpoints = Endpoints {
            proxy: proxy.map(str::to_string),
            ..Endpoints::default()
        };
        Arc::new(ClientContext::new(access, endpoints, "session-1"))
    }

    #[test]
    fn provider_parsing_accepts_aliases_and_rejects_unknown() {
        assert_eq!("Anthropic".parse::<Provider>().expect("parse"), Provider::Claude);
        assert_eq!("bedrock".parse::<Provider>().expect("parse"), Provider::Aws);
        assert_eq!(" google ".parse::<Provider>().expect("parse"), Provider::Gemini);
        let err = "mistral".parse::<Provider>().expect_err("should fail");
        assert!(matches!(err, LlmError::Configuration(_)));
    }

    #[test]
    fn provider_inferred_from_model_name() {
        assert_eq!(Provider::from_model("claude-3-haiku"), Provider::Claude);
        assert_eq!(
            Provider::from_model("us.anthropic.claude-3-7-sonnet-20250219-v1:0"),
            Provider::Aws
        );
        assert_eq!(Provider::from_model("gemini-1.5-pro"), Provider::Gemini);
        assert_eq!(Provider::from_model("gpt-4o"), Provider::OpenAi);
    }

    #[test]
    fn claude_routes_through_proxy_only_when_enabled() {
        let direct = select_backend(Provider::Claude, ctx(false, None)).expect("direct");
        assert_eq!(direct.kind(), BackendKind::Direct);

        let proxied =
            select_backend(Provider::Claude, ctx(true, Some("http://proxy.local"))).expect("proxy");
        assert_eq!(proxied.kind(), BackendKind::Proxy);

        let aws = select_backend(Provider::Aws, ctx(true, Some("http://proxy.local"))).expect("aws");
        assert_eq!(aws.kind(), BackendKind::Proxy);
    }

    #[test]
    fn aws_without_proxy_fails_closed() {
        let err = select_backend(Provider::Aws, ctx(false, None)).expect_err("should fail");
        assert!(matches!(err, LlmError::Configuration(_)));
    }

    #[test]
    fn proxy_without_endpoint_is_a_configuration_error() {
        let err = select_backend(Provider::Claude, ctx(true, None)).expect_err("should fail");
        assert!(matches!(err, LlmError::Configuration(_)));
    }

    #[test]
    fn remaining_providers_map_one_to_one() {
        let openai = select_backend(Provider::OpenAi, ctx(true, None)).expect("openai");
        assert_eq!(openai.kind(), BackendKind::OpenAi);
        let gemini = select_backend(Provider::Gemini, ctx(false, None)).expect("gemini");
        assert_eq!(gemini.kind(), BackendKind::Gemini);
    }
}

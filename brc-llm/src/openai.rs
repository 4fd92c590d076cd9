use crate::api::{ChatBackend, ChatRequest, ChunkStream};
use crate::auth::{AuthTarget, ServiceProvider, apply_headers, build_headers};
use crate::client::ClientContext;
use crate::error::{LlmError, Result};
use crate::framing::decode_sse;
use crate::models;
use crate::types::{
    ChatMessage, Completion, ContentPart, LlmModel, LlmModelProvider, LlmUsage, MessageContent,
    StreamChunk, Usage,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Chat-capable model families in the `/v1/models` listing.
const CHAT_MODEL_PREFIXES: &[&str] = &["gpt-", "chatgpt-", "o1", "o3", "o4"];
const NON_CHAT_MARKERS: &[&str] = &[
    "instruct",
    "audio",
    "realtime",
    "tts",
    "transcribe",
    "search",
    "image",
];

#[derive(Clone)]
pub struct OpenAiClient {
    ctx: Arc<ClientContext>,
    service: ServiceProvider,
}

impl OpenAiClient {
    pub fn new(ctx: Arc<ClientContext>) -> Result<Self> {
        let service = match ctx.access.service_provider {
            ServiceProvider::Azure => {
                if ctx.endpoints.azure.as_deref().is_none_or(|u| u.trim().is_empty()) {
                    return Err(LlmError::Configuration(
                        "azure service provider selected but no azure endpoint is configured"
                            .to_string(),
                    ));
                }
                ServiceProvider::Azure
            }
            _ => ServiceProvider::OpenAi,
        };
        Ok(Self { ctx, service })
    }

    fn chat_url(&self, model: &str) -> String {
        let endpoints = &self.ctx.endpoints;
        match (self.service, endpoints.azure.as_deref()) {
            (ServiceProvider::Azure, Some(azure)) => format!(
                "{}/openai/deployments/{model}/chat/completions?api-version={}",
                azure.trim().trim_end_matches('/'),
                endpoints.azure_api_version
            ),
            _ => format!(
                "{}/v1/chat/completions",
                endpoints.openai.trim_end_matches('/')
            ),
        }
    }

    fn headers(&self, model: &str) -> std::collections::BTreeMap<String, String> {
        build_headers(
            &self.ctx.access,
            &AuthTarget {
                provider: self.service,
                model,
                session_id: &self.ctx.session_id,
                is_app: self.ctx.is_app,
            },
        )
    }

    fn post(&self, request: &ChatRequest, stream: bool) -> reqwest::RequestBuilder {
        let model = &request.config.model;
        let body = OpenAiChatRequest::new(request, stream);
        let req = self.ctx.http.post(self.chat_url(model));
        apply_headers(req, &self.headers(model)).json(&body)
    }

    pub async fn usage(&self) -> Result<LlmUsage> {
        Err(LlmError::provider(
            "the openai api does not expose account usage",
        ))
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn models(&self) -> Result<Vec<LlmModel>> {
        if self.service == ServiceProvider::Azure {
            tracing::debug!("azure deployments are not listable; returning no models");
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/v1/models",
            self.ctx.endpoints.openai.trim_end_matches('/')
        );
        let req = self.ctx.http.get(url);
        let response = apply_headers(req, &self.headers("")).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::from_response(status.as_u16(), &body));
        }

        let listing: OpenAiModelList = serde_json::from_str(&body)?;
        let mut out: Vec<LlmModel> = listing
            .data
            .into_iter()
            .filter(|m| is_chat_model(&m.id))
            .map(|m| LlmModel {
                display_name: m.id.clone(),
                model_id: Some(m.id.clone()),
                name: m.id,
                available: true,
                anthropic_version: None,
                provider: LlmModelProvider {
                    id: Some("openai".to_string()),
                    provider_name: Some("OpenAI".to_string()),
                    provider_type: Some(m.owned_by.unwrap_or_else(|| "openai".to_string())),
                },
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

fn is_chat_model(id: &str) -> bool {
    let id = id.to_ascii_lowercase();
    CHAT_MODEL_PREFIXES.iter().any(|p| id.starts_with(p))
        && !NON_CHAT_MARKERS.iter().any(|m| id.contains(m))
}

#[async_trait]
impl ChatBackend for OpenAiClient {
    fn name(&self) -> &'static str {
        match self.service {
            ServiceProvider::Azure => "azure",
            _ => "openai",
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn complete(&self, request: &ChatRequest) -> Result<Completion> {
        let response = self.post(request, false).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::from_response(status.as_u16(), &body));
        }

        let parsed: OpenAiChatResponse = serde_json::from_str(&body)?;
        parsed.try_into()
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn open_stream(&self, request: &ChatRequest) -> Result<ChunkStream> {
        let response = self.post(request, true).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_response(status.as_u16(), &body));
        }

        let sse = Box::pin(decode_sse(response.bytes_stream()));
        let stream = futures_util::stream::unfold(
            (sse, OpenAiStreamState::default()),
            |(mut sse, mut state)| async move {
                loop {
                    if state.finished {
                        return None;
                    }
                    let data = match sse.as_mut().next().await? {
                        Ok(event) => event.data,
                        Err(e) => {
                            state.finished = true;
                            return Some((Err(e), (sse, state)));
                        }
                    };
                    if let Some(item) = state.on_data(&data) {
                        return Some((item, (sse, state)));
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Default)]
struct OpenAiStreamState {
    usage: Option<Usage>,
    finished: bool,
}

impl OpenAiStreamState {
    fn on_data(&mut self, data: &str) -> Option<Result<StreamChunk>> {
        if data.trim() == "[DONE]" {
            self.finished = true;
            return Some(Ok(StreamChunk::Done { usage: self.usage }));
        }

        let chunk: OpenAiStreamResponseChunk = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                return Some(Err(LlmError::Parse(format!(
                    "openai chunk json error={e} data={data}"
                ))));
            }
        };

        if let Some(err) = chunk.error {
            self.finished = true;
            let message = crate::error::error_summary(&serde_json::json!({ "error": err.clone() }))
                .unwrap_or_else(|| err.to_string());
            return Some(Err(LlmError::provider(message)));
        }

        if let Some(u) = chunk.usage.as_ref() {
            self.usage = Some(Usage::from_counts(
                u.prompt_tokens.unwrap_or(0),
                u.completion_tokens.unwrap_or(0),
            ));
        }

        let content = chunk.choices.into_iter().next()?.delta.content?;
        if content.is_empty() {
            return None;
        }
        Some(Ok(StreamChunk::Delta { content }))
    }
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<OpenAiStreamOptions>,
}

#[derive(Debug, Serialize)]
struct OpenAiStreamOptions {
    include_usage: bool,
}

impl OpenAiChatRequest {
    fn new(request: &ChatRequest, stream: bool) -> Self {
        let config = &request.config;
        if config.reasoning.is_some() {
            tracing::debug!(model = %config.model, "reasoning config is not forwarded to openai");
        }
        let (temperature, top_p) = config.effective_sampling();
        let vision = models::is_vision_model(&config.model);
        let finite = |v: Option<f32>| v.filter(|x| x.is_finite());

        Self {
            model: config.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| to_openai_message(m, vision))
                .collect(),
            temperature,
            top_p,
            max_tokens: config.max_tokens,
            presence_penalty: finite(config.presence_penalty),
            frequency_penalty: finite(config.frequency_penalty),
            stream: if stream { Some(true) } else { None },
            stream_options: if stream {
                Some(OpenAiStreamOptions {
                    include_usage: true,
                })
            } else {
                None
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: OpenAiContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OpenAiContent {
    Text(String),
    Parts(Vec<OpenAiPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAiPart {
    Text { text: String },
    ImageUrl { image_url: OpenAiImageUrl },
}

#[derive(Debug, Serialize)]
struct OpenAiImageUrl {
    url: String,
}

fn to_openai_message(m: &ChatMessage, vision: bool) -> OpenAiMessage {
    let content = match &m.content {
        MessageContent::Parts(parts) if vision && m.content.has_media() => OpenAiContent::Parts(
            parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => OpenAiPart::Text { text: text.clone() },
                    ContentPart::ImageUrl { image_url } => OpenAiPart::ImageUrl {
                        image_url: OpenAiImageUrl {
                            url: image_url.url.clone(),
                        },
                    },
                    ContentPart::Doc { doc } => OpenAiPart::Text {
                        text: document_note(&doc.name, &doc.format),
                    },
                })
                .collect(),
        ),
        MessageContent::Parts(parts) => OpenAiContent::Text(
            parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.clone()),
                    ContentPart::Doc { doc } => Some(document_note(&doc.name, &doc.format)),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        MessageContent::Text(text) => OpenAiContent::Text(text.clone()),
    };
    OpenAiMessage {
        role: m.role.as_str(),
        content,
    }
}

fn document_note(name: &str, format: &str) -> String {
    format!("[attached document: {name}.{format}]")
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

impl TryFrom<OpenAiChatResponse> for Completion {
    type Error = LlmError;

    fn try_from(v: OpenAiChatResponse) -> Result<Self> {
        let choice = v
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Parse("openai response missing choices[0]".to_string()))?;
        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            usage: v.usage.map(|u| {
                Usage::from_counts(u.prompt_tokens.unwrap_or(0), u.completion_tokens.unwrap_or(0))
            }),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamResponseChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiModelList {
    #[serde(default)]
    data: Vec<OpenAiModelEntry>,
}

#[derive(Debug, Deserialize)]
struct OpenAiModelEntry {
    id: String,
    #[serde(default)]
    owned_by: Option<String>,
}

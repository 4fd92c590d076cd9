use crate::api::{ChatBackend, ChatRequest, ChunkStream};
use crate::auth::{AuthTarget, ServiceProvider, apply_headers, build_headers};
use crate::client::ClientContext;
use crate::convert::{self, Part, Turn};
use crate::driver::ReasoningFormatter;
use crate::error::{LlmError, Result};
use crate::framing::{SseEvent, decode_sse};
use crate::models::{self, CatalogFlavor};
use crate::types::{Completion, LlmModel, LlmUsage, Role, StreamChunk, Usage, clamp_tokens};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Direct backend: Claude through the Anthropic Messages API.
#[derive(Clone)]
pub struct AnthropicClient {
    ctx: Arc<ClientContext>,
}

impl AnthropicClient {
    pub fn new(ctx: Arc<ClientContext>) -> Self {
        Self { ctx }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/v1/messages",
            self.ctx.endpoints.anthropic.trim_end_matches('/')
        )
    }

    fn post(&self, request: &ChatRequest, stream: bool) -> reqwest::RequestBuilder {
        let body = AnthropicRequest::new(request, stream);
        let headers = build_headers(
            &self.ctx.access,
            &AuthTarget {
                provider: ServiceProvider::Anthropic,
                model: &request.config.model,
                session_id: &self.ctx.session_id,
                is_app: self.ctx.is_app,
            },
        );
        let req = self
            .ctx
            .http
            .post(self.messages_url())
            .header("anthropic-version", ANTHROPIC_VERSION);
        apply_headers(req, &headers).json(&body)
    }

    pub async fn usage(&self) -> Result<LlmUsage> {
        Err(LlmError::provider(
            "the anthropic api does not expose account usage",
        ))
    }

    pub async fn models(&self) -> Result<Vec<LlmModel>> {
        Ok(models::claude_catalog(CatalogFlavor::AnthropicApi))
    }
}

#[async_trait]
impl ChatBackend for AnthropicClient {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn complete(&self, request: &ChatRequest) -> Result<Completion> {
        let response = self.post(request, false).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::from_response(status.as_u16(), &body));
        }

        let parsed: AnthropicResponse = serde_json::from_str(&body)?;
        Ok(parsed.into_completion())
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
            (sse, AnthropicStreamState::default()),
            |(mut sse, mut state)| async move {
                loop {
                    if state.finished {
                        return None;
                    }
                    let event = match sse.as_mut().next().await? {
                        Ok(v) => v,
                        Err(e) => {
                            state.finished = true;
                            return Some((Err(e), (sse, state)));
                        }
                    };
                    if let Some(item) = state.on_event(event) {
                        return Some((item, (sse, state)));
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Default)]
struct AnthropicStreamState {
    usage: Usage,
    finished: bool,
}

impl AnthropicStreamState {
    fn on_event(&mut self, event: SseEvent) -> Option<Result<StreamChunk>> {
        let SseEvent { event, data } = event;
        match event.as_str() {
            "message_start" => {
                if let Ok(v) = serde_json::from_str::<AnthropicMessageStart>(&data) {
                    self.usage.prompt_tokens = clamp_tokens(v.message.usage.input_tokens);
                    self.usage.completion_tokens = clamp_tokens(v.message.usage.output_tokens);
                }
                None
            }
            "content_block_delta" => {
                let v: AnthropicContentBlockDelta = match serde_json::from_str(&data) {
                    Ok(v) => v,
                    Err(e) => {
                        return Some(Err(LlmError::Parse(format!(
                            "anthropic delta json error={e} data={data}"
                        ))));
                    }
                };
                match v.delta {
                    AnthropicDelta::TextDelta { text } if !text.is_empty() => {
                        Some(Ok(StreamChunk::Delta { content: text }))
                    }
                    AnthropicDelta::ThinkingDelta { thinking } if !thinking.is_empty() => {
                        Some(Ok(StreamChunk::Thinking { content: thinking }))
                    }
                    _ => None,
                }
            }
            "message_delta" => {
                if let Ok(v) = serde_json::from_str::<AnthropicMessageDelta>(&data) {
                    if let Some(u) = v.usage {
                        if u.input_tokens > 0 {
                            self.usage.prompt_tokens = clamp_tokens(u.input_tokens);
                        }
                        self.usage.completion_tokens = clamp_tokens(u.output_tokens);
                    }
                }
                None
            }
            "message_stop" => {
                self.finished = true;
                Some(Ok(StreamChunk::Done {
                    usage: Some(self.usage),
                }))
            }
            "error" => {
                self.finished = true;
                let message = serde_json::from_str::<serde_json::Value>(&data)
                    .ok()
                    .and_then(|v| crate::error::error_summary(&v))
                    .unwrap_or(data);
                Some(Err(LlmError::provider(message)))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<AnthropicThinking>,
}

#[derive(Debug, Serialize)]
struct AnthropicThinking {
    r#type: &'static str,
    budget_tokens: u32,
}

impl AnthropicRequest {
    fn new(request: &ChatRequest, stream: bool) -> Self {
        let config = &request.config;
        let conversation = convert::normalize(
            &request.messages,
            models::is_vision_model(&config.model),
        );
        let (temperature, top_p) = config.effective_sampling();

        let mut max_tokens = config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        let thinking = config.active_reasoning().map(|r| {
            // Thinking budget must stay below max_tokens.
            if max_tokens <= r.budget_tokens {
                max_tokens = r.budget_tokens.saturating_add(DEFAULT_MAX_TOKENS);
            }
            AnthropicThinking {
                r#type: "enabled",
                budget_tokens: r.budget_tokens,
            }
        });

        Self {
            model: models::anthropic_model_id(&config.model),
            max_tokens,
            system: conversation.system,
            messages: conversation.turns.iter().map(to_anthropic_message).collect(),
            temperature,
            top_p,
            stream: if stream { Some(true) } else { None },
            thinking,
        }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text { text: String },
    Image { source: AnthropicSource },
    Document { source: AnthropicSource },
}

#[derive(Debug, Serialize)]
struct AnthropicSource {
    r#type: &'static str,
    media_type: String,
    data: String,
}

fn to_anthropic_message(turn: &Turn) -> AnthropicMessage {
    let role = match turn.role {
        Role::Assistant => "assistant",
        Role::User | Role::System => "user",
    };
    let content = turn
        .parts
        .iter()
        .map(|p| match p {
            Part::Text(text) => AnthropicContentBlock::Text { text: text.clone() },
            Part::Image(img) => AnthropicContentBlock::Image {
                source: AnthropicSource {
                    r#type: "base64",
                    media_type: img.media_type.clone(),
                    data: img.data.clone(),
                },
            },
            Part::Document(doc) => AnthropicContentBlock::Document {
                source: AnthropicSource {
                    r#type: "base64",
                    media_type: doc.media_type().to_string(),
                    data: base64_encode(&doc.source.bytes),
                },
            },
        })
        .collect();
    AnthropicMessage { role, content }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicResponseBlock>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    #[serde(other)]
    Other,
}

impl AnthropicResponse {
    fn into_completion(self) -> Completion {
        let mut reasoning = ReasoningFormatter::default();
        let mut text = String::new();
        for block in self.content {
            match block {
                AnthropicResponseBlock::Text { text: t } => text.push_str(&reasoning.text(&t)),
                AnthropicResponseBlock::Thinking { thinking } => {
                    text.push_str(&reasoning.thinking(&thinking))
                }
                AnthropicResponseBlock::Other => {}
            }
        }
        Completion {
            text,
            usage: Some(Usage::from_counts(
                self.usage.input_tokens,
                self.usage.output_tokens,
            )),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessageStart {
    message: AnthropicMessageStartMessage,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessageStartMessage {
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlockDelta {
    delta: AnthropicDelta,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicDelta {
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        thinking: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessageDelta {
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

//! Claude on Bedrock, reached through a Converse-compatible proxy.
//!
//! The proxy exposes `/model/{id}/converse` and `/model/{id}/converse-stream`
//! with the Bedrock Converse JSON shapes, streaming one event object per line.

use crate::api::{ChatBackend, ChatRequest, ChunkStream};
use crate::auth::{AuthTarget, ServiceProvider, apply_headers, build_headers};
use crate::client::ClientContext;
use crate::convert::{self, Part, Turn};
use crate::driver::ReasoningFormatter;
use crate::error::{LlmError, Result};
use crate::framing::decode_ndjson;
use crate::models::{self, CatalogFlavor};
use crate::types::{Completion, LlmModel, LlmUsage, Role, StreamChunk, Usage};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct ProxyClient {
    ctx: Arc<ClientContext>,
    base_url: String,
}

impl ProxyClient {
    pub fn new(ctx: Arc<ClientContext>) -> Result<Self> {
        let base_url = ctx
            .endpoints
            .proxy
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                LlmError::Configuration("use_proxy is set but no proxy endpoint is configured".to_string())
            })?
            .trim_end_matches('/')
            .to_string();
        Ok(Self { ctx, base_url })
    }

    fn headers(&self, model: &str) -> std::collections::BTreeMap<String, String> {
        build_headers(
            &self.ctx.access,
            &AuthTarget {
                provider: ServiceProvider::Proxy,
                model,
                session_id: &self.ctx.session_id,
                is_app: self.ctx.is_app,
            },
        )
    }

    fn post(&self, request: &ChatRequest, stream: bool) -> reqwest::RequestBuilder {
        let model_id = models::bedrock_model_id(&request.config.model);
        let action = if stream { "converse-stream" } else { "converse" };
        let url = format!("{}/model/{model_id}/{action}", self.base_url);
        let body = ConverseRequest::new(request);
        let req = self.ctx.http.post(url);
        apply_headers(req, &self.headers(&request.config.model)).json(&body)
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn usage(&self) -> Result<LlmUsage> {
        let req = self.ctx.http.get(format!("{}/usage", self.base_url));
        let response = apply_headers(req, &self.headers("")).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::from_response(status.as_u16(), &body));
        }

        let usage: LlmUsage = serde_json::from_str(&body)?;
        if usage.used > usage.total {
            return Err(LlmError::provider(format!(
                "proxy reported usage above quota: used={} total={}",
                usage.used, usage.total
            )));
        }
        Ok(usage)
    }

    pub async fn models(&self) -> Result<Vec<LlmModel>> {
        Ok(models::claude_catalog(CatalogFlavor::Bedrock))
    }
}

#[async_trait]
impl ChatBackend for ProxyClient {
    fn name(&self) -> &'static str {
        "bedrock-proxy"
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn complete(&self, request: &ChatRequest) -> Result<Completion> {
        let response = self.post(request, false).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::from_response(status.as_u16(), &body));
        }

        let parsed: ConverseResponse = serde_json::from_str(&body)?;
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

        let lines = Box::pin(decode_ndjson(response.bytes_stream()));
        let stream = futures_util::stream::unfold(
            (lines, false),
            |(mut lines, mut finished)| async move {
                loop {
                    if finished {
                        return None;
                    }
                    let line = match lines.as_mut().next().await? {
                        Ok(v) => v,
                        Err(e) => {
                            finished = true;
                            return Some((Err(e), (lines, finished)));
                        }
                    };
                    tracing::debug!(len = line.len(), "converse stream frame");
                    let item = parse_stream_event(&line);
                    if matches!(
                        item,
                        Some(Ok(StreamChunk::Done { .. })) | Some(Err(LlmError::Provider { .. }))
                    ) {
                        finished = true;
                    }
                    if let Some(item) = item {
                        return Some((item, (lines, finished)));
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}

/// Map one Converse stream event. `None` means the event carries nothing the
/// caller needs (block start/stop, message start/stop).
fn parse_stream_event(line: &str) -> Option<Result<StreamChunk>> {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            return Some(Err(LlmError::Parse(format!(
                "converse event json error={e} line={line}"
            ))));
        }
    };

    if let Some(message) = stream_error_message(&value) {
        return Some(Err(LlmError::provider(message)));
    }

    if let Some(delta) = value.pointer("/contentBlockDelta/delta") {
        if let Some(text) = delta.get("text").and_then(Value::as_str) {
            if text.is_empty() {
                return None;
            }
            return Some(Ok(StreamChunk::Delta {
                content: text.to_string(),
            }));
        }
        if let Some(text) = delta
            .pointer("/reasoningContent/text")
            .and_then(Value::as_str)
        {
            if text.is_empty() {
                return None;
            }
            return Some(Ok(StreamChunk::Thinking {
                content: text.to_string(),
            }));
        }
        return None;
    }

    if let Some(usage) = value.pointer("/metadata/usage") {
        let field = |name: &str| usage.get(name).and_then(Value::as_u64).unwrap_or(0);
        return Some(Ok(StreamChunk::Done {
            usage: Some(Usage::from_counts(field("inputTokens"), field("outputTokens"))),
        }));
    }

    None
}

fn stream_error_message(value: &Value) -> Option<String> {
    let obj = value.as_object()?;
    if let Some((key, inner)) = obj.iter().find(|(k, _)| k.ends_with("Exception")) {
        let detail = crate::error::error_summary(inner).unwrap_or_else(|| inner.to_string());
        return Some(format!("{key}: {detail}"));
    }
    if obj.contains_key("message") || obj.contains_key("error") {
        return Some(crate::error::error_summary(value).unwrap_or_else(|| value.to_string()));
    }
    None
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConverseRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    system: Vec<ConverseSystem>,
    messages: Vec<ConverseMessage>,
    inference_config: InferenceConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    additional_model_request_fields: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ConverseSystem {
    text: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct InferenceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ConverseMessage {
    role: &'static str,
    content: Vec<ConverseBlock>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum ConverseBlock {
    Text(String),
    Image(ConverseImage),
    Document(ConverseDocument),
}

#[derive(Debug, Serialize)]
struct ConverseImage {
    format: String,
    source: ConverseSource,
}

#[derive(Debug, Serialize)]
struct ConverseDocument {
    name: String,
    format: String,
    source: ConverseSource,
}

#[derive(Debug, Serialize)]
struct ConverseSource {
    bytes: String,
}

impl ConverseRequest {
    fn new(request: &ChatRequest) -> Self {
        let config = &request.config;
        let conversation = convert::normalize(
            &request.messages,
            models::is_vision_model(&config.model),
        );
        let (temperature, top_p) = config.effective_sampling();

        let additional_model_request_fields = config.active_reasoning().map(|r| {
            serde_json::json!({
                "reasoning_config": {
                    "type": "enabled",
                    "budget_tokens": r.budget_tokens,
                }
            })
        });

        Self {
            system: conversation
                .system
                .into_iter()
                .map(|text| ConverseSystem { text })
                .collect(),
            messages: conversation.turns.iter().map(to_converse_message).collect(),
            inference_config: InferenceConfig {
                max_tokens: config.max_tokens,
                temperature,
                top_p,
            },
            additional_model_request_fields,
        }
    }
}

fn to_converse_message(turn: &Turn) -> ConverseMessage {
    use base64::Engine;

    let role = match turn.role {
        Role::Assistant => "assistant",
        Role::User | Role::System => "user",
    };
    let content = turn
        .parts
        .iter()
        .map(|p| match p {
            Part::Text(text) => ConverseBlock::Text(text.clone()),
            Part::Image(img) => ConverseBlock::Image(ConverseImage {
                format: img.format().to_string(),
                source: ConverseSource {
                    bytes: img.data.clone(),
                },
            }),
            Part::Document(doc) => ConverseBlock::Document(ConverseDocument {
                name: doc.name.clone(),
                format: doc.format.clone(),
                source: ConverseSource {
                    bytes: base64::engine::general_purpose::STANDARD.encode(&doc.source.bytes),
                },
            }),
        })
        .collect();
    ConverseMessage { role, content }
}

#[derive(Debug, Deserialize)]
struct ConverseResponse {
    output: ConverseOutput,
    #[serde(default)]
    usage: Option<ConverseUsage>,
}

#[derive(Debug, Deserialize)]
struct ConverseOutput {
    message: ConverseOutputMessage,
}

#[derive(Debug, Deserialize)]
struct ConverseOutputMessage {
    #[serde(default)]
    content: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConverseUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl ConverseResponse {
    fn into_completion(self) -> Completion {
        let mut reasoning = ReasoningFormatter::default();
        let mut text = String::new();
        for block in &self.output.message.content {
            if let Some(t) = block.get("text").and_then(Value::as_str) {
                text.push_str(&reasoning.text(t));
            } else if let Some(t) = block
                .pointer("/reasoningContent/reasoningText/text")
                .and_then(Value::as_str)
            {
                text.push_str(&reasoning.thinking(t));
            }
        }
        Completion {
            text,
            usage: self.usage.map(|u| Usage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        AttachmentDocument, ChatMessage, ContentPart, DocumentSource, ImageUrl, MessageContent,
        ModelConfig, ReasoningConfig,
    };
    use serde_json::json;

    #[test]
    fn converse_body_uses_bedrock_shapes() {
        let mut config = ModelConfig::new("claude-3.7-sonnet");
        config.max_tokens = Some(2000);
        config.temperature = Some(0.2);
        config.top_p = Some(0.9);
        config.reasoning = Some(ReasoningConfig {
            budget_tokens: 1024,
        });
        let request = ChatRequest {
            messages: vec![
                ChatMessage::system("sys"),
                ChatMessage::new(
                    Role::User,
                    MessageContent::Parts(vec![
                        ContentPart::Text {
                            text: "look".to_string(),
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: "data:image/png;base64,iVBO".to_string(),
                            },
                        },
                        ContentPart::Doc {
                            doc: AttachmentDocument {
                                name: "report".to_string(),
                                format: "pdf".to_string(),
                                size: Some(3),
                                source: DocumentSource {
                                    bytes: b"pdf".to_vec(),
                                },
                            },
                        },
                    ]),
                ),
            ],
            config,
        };

        let v = serde_json::to_value(ConverseRequest::new(&request)).expect("serialize");
        assert_eq!(
            v,
            json!({
                "system": [{"text": "sys"}],
                "messages": [{
                    "role": "user",
                    "content": [
                        {"text": "look"},
                        {"image": {"format": "png", "source": {"bytes": "iVBO"}}},
                        {"document": {"name": "report", "format": "pdf", "source": {"bytes": "cGRm"}}}
                    ]
                }],
                "inferenceConfig": {"maxTokens": 2000, "temperature": 1.0},
                "additionalModelRequestFields": {
                    "reasoning_config": {"type": "enabled", "budget_tokens": 1024}
                }
            })
        );
    }

    #[test]
    fn reasoning_budget_is_dropped_for_models_without_thinking() {
        let mut config = ModelConfig::new("claude-3-haiku");
        config.temperature = Some(0.2);
        config.top_p = Some(0.9);
        config.reasoning = Some(ReasoningConfig {
            budget_tokens: 1024,
        });
        let request = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            config,
        };

        let v = serde_json::to_value(ConverseRequest::new(&request)).expect("serialize");
        assert!(v.get("additionalModelRequestFields").is_none());
        assert_eq!(v["inferenceConfig"]["temperature"], json!(0.2f32));
        assert_eq!(v["inferenceConfig"]["topP"], json!(0.9f32));
    }

    #[test]
    fn stream_events_map_to_chunks() {
        assert_eq!(
            parse_stream_event(r#"{"contentBlockDelta":{"delta":{"text":"Hi"},"contentBlockIndex":0}}"#),
            Some(Ok(StreamChunk::Delta {
                content: "Hi".to_string()
            }))
        );
        assert_eq!(
            parse_stream_event(
                r#"{"contentBlockDelta":{"delta":{"reasoningContent":{"text":"hmm"}},"contentBlockIndex":0}}"#
            ),
            Some(Ok(StreamChunk::Thinking {
                content: "hmm".to_string()
            }))
        );
        assert_eq!(parse_stream_event(r#"{"messageStart":{"role":"assistant"}}"#), None);
        assert_eq!(parse_stream_event(r#"{"messageStop":{"stopReason":"end_turn"}}"#), None);
        assert_eq!(
            parse_stream_event(r#"{"metadata":{"usage":{"inputTokens":3,"outputTokens":4,"totalTokens":7}}}"#),
            Some(Ok(StreamChunk::Done {
                usage: Some(Usage {
                    prompt_tokens: 3,
                    completion_tokens: 4,
                })
            }))
        );
    }

    #[test]
    fn error_payloads_become_provider_errors() {
        assert_eq!(
            parse_stream_event(r#"{"message":"Too many requests"}"#),
            Some(Err(LlmError::provider("Too many requests")))
        );
        assert_eq!(
            parse_stream_event(r#"{"throttlingException":{"message":"slow down"}}"#),
            Some(Err(LlmError::provider("throttlingException: slow down")))
        );
        assert!(matches!(
            parse_stream_event("{oops"),
            Some(Err(LlmError::Parse(_)))
        ));
    }

    #[test]
    fn converse_response_collects_text_and_reasoning() {
        let parsed: ConverseResponse = serde_json::from_value(json!({
            "output": {"message": {"role": "assistant", "content": [
                {"reasoningContent": {"reasoningText": {"text": "a\nb"}}},
                {"text": "Answer"}
            ]}},
            "usage": {"inputTokens": 1, "outputTokens": 2}
        }))
        .expect("parse");
        let completion = parsed.into_completion();
        assert_eq!(completion.text, "> **Think:**\n> a\n> b\n\nAnswer");
        assert_eq!(
            completion.usage,
            Some(Usage {
                prompt_tokens: 1,
                completion_tokens: 2
            })
        );
    }
}

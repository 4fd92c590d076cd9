use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, MessageContent::Text(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, MessageContent::Text(text.into()))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageContent::Text(text.into()))
    }

    /// Text of the message with non-text parts dropped.
    pub fn text(&self) -> String {
        self.content.text()
    }
}

/// Plain text or an ordered list of multimodal parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Parts view; plain text becomes a single text part.
    pub fn parts(&self) -> Vec<ContentPart> {
        match self {
            MessageContent::Text(t) => vec![ContentPart::Text { text: t.clone() }],
            MessageContent::Parts(parts) => parts.clone(),
        }
    }

    pub fn has_media(&self) -> bool {
        match self {
            MessageContent::Text(_) => false,
            MessageContent::Parts(parts) => parts
                .iter()
                .any(|p| !matches!(p, ContentPart::Text { .. })),
        }
    }
}

impl From<String> for MessageContent {
    fn from(v: String) -> Self {
        MessageContent::Text(v)
    }
}

impl From<&str> for MessageContent {
    fn from(v: &str) -> Self {
        MessageContent::Text(v.to_string())
    }
}

impl From<Vec<ContentPart>> for MessageContent {
    fn from(v: Vec<ContentPart>) -> Self {
        MessageContent::Parts(v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    Doc { doc: AttachmentDocument },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    /// Usually a `data:<media-type>;base64,<data>` URL.
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentDocument {
    pub name: String,
    /// File extension style format: "pdf", "txt", "md", "docx", ...
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub source: DocumentSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSource {
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

impl AttachmentDocument {
    pub fn media_type(&self) -> &'static str {
        match self.format.to_ascii_lowercase().as_str() {
            "pdf" => "application/pdf",
            "csv" => "text/csv",
            "html" => "text/html",
            "md" => "text/markdown",
            "doc" => "application/msword",
            "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            "xls" => "application/vnd.ms-excel",
            "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            _ => "text/plain",
        }
    }
}

pub(crate) mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(d)?;
        STANDARD.decode(raw.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// Generation parameters. `None` means "provider default" and is never sent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningConfig>,
}

impl ModelConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Thinking budget to send, or `None` when the model has no extended
    /// thinking.
    pub fn active_reasoning(&self) -> Option<ReasoningConfig> {
        let reasoning = self.reasoning?;
        if crate::models::supports_reasoning(&self.model) {
            Some(reasoning)
        } else {
            tracing::debug!(
                model = %self.model,
                "model does not support reasoning; budget ignored"
            );
            None
        }
    }

    /// Sampling values actually sent: extended thinking requires temperature 1
    /// and no top-p.
    pub fn effective_sampling(&self) -> (Option<f32>, Option<f32>) {
        if self.active_reasoning().is_some() {
            return (Some(1.0), None);
        }
        (
            self.temperature.filter(|v| v.is_finite()),
            self.top_p.filter(|v| v.is_finite()),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningConfig {
    pub budget_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema.
    pub parameters: serde_json::Value,
}

/// Tools offered to a model through the generated system prompt.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolSet {
    pub definitions: Vec<ToolDefinition>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub configuration: Option<String>,
}

/// Token metrics reported with a finished completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Usage {
    /// Build from wire counters, clamping anything past `u32::MAX`.
    pub fn from_counts(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens: clamp_tokens(prompt_tokens),
            completion_tokens: clamp_tokens(completion_tokens),
        }
    }

    pub fn total(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

pub(crate) fn clamp_tokens(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Account-level usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub used: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LlmModelProvider {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(default)]
    pub provider_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmModel {
    pub name: String,
    pub display_name: String,
    pub available: bool,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub anthropic_version: Option<String>,
    pub provider: LlmModelProvider,
}

/// One decoded unit of model output, produced by a backend stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Delta { content: String },
    Thinking { content: String },
    Done { usage: Option<Usage> },
}

/// Result of a single-shot (non-streaming) request.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<Usage>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_accepts_plain_string_and_parts() {
        let plain: ChatMessage =
            serde_json::from_value(json!({"role": "user", "content": "hello"})).expect("plain");
        assert_eq!(plain.content, MessageContent::Text("hello".to_string()));

        let parts: ChatMessage = serde_json::from_value(json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "look"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}},
                {"type": "doc", "doc": {"name": "a", "format": "pdf", "source": {"bytes": "aGk="}}}
            ]
        }))
        .expect("parts");
        let MessageContent::Parts(items) = &parts.content else {
            panic!("expected parts");
        };
        assert_eq!(items.len(), 3);
        match &items[2] {
            ContentPart::Doc { doc } => assert_eq!(doc.source.bytes, b"hi".to_vec()),
            other => panic!("expected doc, got {other:?}"),
        }
        assert_eq!(parts.text(), "look");
        assert!(parts.content.has_media());
    }

    #[test]
    fn model_config_omits_absent_fields() {
        let cfg = ModelConfig::new("claude-3-sonnet");
        let v = serde_json::to_value(&cfg).expect("serialize");
        assert_eq!(v, json!({"model": "claude-3-sonnet", "stream": false}));
    }

    #[test]
    fn reasoning_forces_sampling_values() {
        let mut cfg = ModelConfig::new("claude-3.7-sonnet");
        cfg.temperature = Some(0.2);
        cfg.top_p = Some(0.9);
        assert_eq!(cfg.effective_sampling(), (Some(0.2), Some(0.9)));

        cfg.reasoning = Some(ReasoningConfig {
            budget_tokens: 1024,
        });
        assert_eq!(cfg.effective_sampling(), (Some(1.0), None));
    }

    #[test]
    fn reasoning_is_ignored_for_models_without_thinking() {
        let mut cfg = ModelConfig::new("claude-3-haiku");
        cfg.temperature = Some(0.2);
        cfg.reasoning = Some(ReasoningConfig {
            budget_tokens: 1024,
        });
        assert_eq!(cfg.active_reasoning(), None);
        assert_eq!(cfg.effective_sampling(), (Some(0.2), None));
    }

    #[test]
    fn usage_counters_saturate() {
        let usage = Usage::from_counts(u64::MAX, 7);
        assert_eq!(usage.prompt_tokens, u32::MAX);
        assert_eq!(usage.completion_tokens, 7);
        assert_eq!(usage.total(), u32::MAX);
        assert_eq!(Usage::from_counts(3, 4).total(), 7);
    }

    #[test]
    fn non_finite_sampling_values_are_dropped() {
        let mut cfg = ModelConfig::new("m");
        cfg.temperature = Some(f32::NAN);
        assert_eq!(cfg.effective_sampling(), (None, None));
    }
}

//! Provider layer for BRClient.
//!
//! One callback-driven chat contract (`LlmApi`) over several model services:
//! the Anthropic Messages API, a Bedrock Converse proxy, OpenAI/Azure, and a
//! Gemini placeholder. `select_backend` picks one from a `Provider` and a
//! shared `ClientContext`.

mod anthropic;
mod api;
mod auth;
mod client;
mod convert;
mod driver;
mod error;
mod framing;
mod gemini;
mod models;
mod openai;
mod options;
mod proxy;
mod share;
mod tool_prompt;
mod types;

pub use anthropic::AnthropicClient;
pub use api::{ChunkStream, LlmApi};
pub use auth::{
    AccessConfig, AuthTarget, DEFAULT_ACCESS_CODE_PREFIX, ServiceProvider, auth_header_name,
    build_headers,
};
pub use client::{Backend, BackendKind, ClientContext, Endpoints, Provider, select_backend};
pub use error::{LlmError, Result};
pub use framing::{SseEvent, decode_ndjson, decode_sse};
pub use gemini::GeminiClient;
pub use models::{BEDROCK_ANTHROPIC_VERSION, is_vision_model, supports_reasoning};
pub use openai::OpenAiClient;
pub use options::{AbortHandle, ChatOptions};
pub use proxy::ProxyClient;
pub use share::{ShareConfig, share};
pub use tool_prompt::{DEFAULT_TOOL_CONFIGURATION, DEFAULT_USER_SYSTEM_PROMPT, generate_tool_prompt};
pub use types::{
    AttachmentDocument, ChatMessage, Completion, ContentPart, DocumentSource, ImageUrl, LlmModel,
    LlmModelProvider, LlmUsage, MessageContent, ModelConfig, ReasoningConfig, Role, StreamChunk,
    ToolDefinition, ToolSet, Usage,
};

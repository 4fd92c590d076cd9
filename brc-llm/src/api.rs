use crate::error::Result;
use crate::options::ChatOptions;
use crate::types::{ChatMessage, Completion, LlmModel, LlmUsage, ModelConfig, StreamChunk};
use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Capability set every backend offers to the UI layer.
#[async_trait]
pub trait LlmApi: Send + Sync {
    /// Run one chat request. Outcomes are reported through the callbacks in
    /// `options`: exactly one of `on_finish` / `on_error` fires. The returned
    /// `Err` is reserved for configuration errors found before any network call.
    async fn chat(&self, options: ChatOptions) -> Result<()>;

    async fn usage(&self) -> Result<LlmUsage>;

    async fn models(&self) -> Result<Vec<LlmModel>>;
}

/// Request as seen by a backend after validation and tool-prompt injection.
#[derive(Debug, Clone)]
pub(crate) struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub config: ModelConfig,
}

/// Wire-level half of a backend; the shared driver turns it into the
/// callback contract.
#[async_trait]
pub(crate) trait ChatBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(&self, request: &ChatRequest) -> Result<Completion>;

    async fn open_stream(&self, request: &ChatRequest) -> Result<ChunkStream>;
}

use crate::api::{ChatBackend, ChatRequest, ChunkStream};
use crate::error::{LlmError, Result};
use crate::types::{Completion, LlmModel, LlmUsage};
use async_trait::async_trait;

const UNAVAILABLE: &str = "gemini backend is not available";

/// Placeholder for Gemini: selectable, but every request fails at runtime.
#[derive(Debug, Clone, Default)]
pub struct GeminiClient;

impl GeminiClient {
    pub fn new() -> Self {
        Self
    }

    pub async fn usage(&self) -> Result<LlmUsage> {
        Err(LlmError::provider(UNAVAILABLE))
    }

    pub async fn models(&self) -> Result<Vec<LlmModel>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl ChatBackend for GeminiClient {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn complete(&self, _request: &ChatRequest) -> Result<Completion> {
        Err(LlmError::provider(UNAVAILABLE))
    }

    async fn open_stream(&self, _request: &ChatRequest) -> Result<ChunkStream> {
        Err(LlmError::provider(UNAVAILABLE))
    }
}

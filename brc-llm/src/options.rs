use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ModelConfig, ToolSet, Usage};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub type UpdateFn = Box<dyn FnMut(&str, &str) + Send>;
pub type FinishFn = Box<dyn FnOnce(String, Option<Usage>) + Send>;
pub type ErrorFn = Box<dyn FnOnce(LlmError) + Send>;
pub type ControllerFn = Box<dyn FnOnce(AbortHandle) + Send>;

/// Cancellation handle handed to `on_controller` before a request starts.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Abort once `timeout` elapses unless the request settles first.
    pub fn abort_after(&self, timeout: Duration) -> tokio::task::JoinHandle<()> {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    tracing::debug!(timeout_ms = timeout.as_millis() as u64, "request deadline reached; aborting");
                    token.cancel();
                }
            }
        })
    }

    pub(crate) async fn aborted(&self) {
        self.token.cancelled().await
    }
}

/// One user-initiated send: conversation, generation parameters, and the
/// callbacks results are reported through.
pub struct ChatOptions {
    pub messages: Vec<ChatMessage>,
    pub config: ModelConfig,
    pub tools: Option<ToolSet>,
    pub on_update: Option<UpdateFn>,
    pub on_finish: FinishFn,
    pub on_error: Option<ErrorFn>,
    pub on_controller: Option<ControllerFn>,
}

impl ChatOptions {
    pub fn new(
        messages: Vec<ChatMessage>,
        config: ModelConfig,
        on_finish: impl FnOnce(String, Option<Usage>) + Send + 'static,
    ) -> Self {
        Self {
            messages,
            config,
            tools: None,
            on_update: None,
            on_finish: Box::new(on_finish),
            on_error: None,
            on_controller: None,
        }
    }

    pub fn on_update(mut self, f: impl FnMut(&str, &str) + Send + 'static) -> Self {
        self.on_update = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(LlmError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_controller(mut self, f: impl FnOnce(AbortHandle) + Send + 'static) -> Self {
        self.on_controller = Some(Box::new(f));
        self
    }

    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = Some(tools);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.messages.is_empty() {
            return Err(LlmError::Configuration(
                "chat requires at least one message".to_string(),
            ));
        }
        if self.config.model.trim().is_empty() {
            return Err(LlmError::Configuration(
                "chat requires a model identifier".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ChatOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatOptions")
            .field("messages", &self.messages.len())
            .field("config", &self.config)
            .field("tools", &self.tools.as_ref().map(|t| t.definitions.len()))
            .field("on_update", &self.on_update.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_controller", &self.on_controller.is_some())
            .finish()
    }
}

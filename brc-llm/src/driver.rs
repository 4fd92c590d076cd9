//! Turns a backend's chunk stream (or single-shot completion) into the
//! callback contract: ordered updates with growing text, then exactly one
//! terminal callback.

use crate::api::{ChatBackend, ChatRequest};
use crate::error::{LlmError, Result};
use crate::options::{AbortHandle, ChatOptions, UpdateFn};
use crate::tool_prompt::apply_tool_prompt;
use crate::types::{StreamChunk, Usage};
use futures_util::StreamExt;

const THINK_HEADER: &str = "> **Think:**\n> ";

enum Outcome {
    Finished { text: String, usage: Option<Usage> },
    Failed(LlmError),
}

pub(crate) async fn run_chat<B>(backend: &B, options: ChatOptions) -> Result<()>
where
    B: ChatBackend + ?Sized,
{
    options.validate()?;
    let ChatOptions {
        mut messages,
        config,
        tools,
        on_update,
        on_finish,
        on_error,
        on_controller,
    } = options;

    if let Some(tools) = tools.as_ref().filter(|t| !t.definitions.is_empty()) {
        apply_tool_prompt(&mut messages, tools)
            .map_err(|e| LlmError::Configuration(format!("invalid tool definitions: {e}")))?;
    }

    let controller = AbortHandle::new();
    if let Some(f) = on_controller {
        f(controller.clone());
    }

    let request = ChatRequest { messages, config };
    tracing::info!(
        backend = backend.name(),
        model = %request.config.model,
        stream = request.config.stream,
        messages = request.messages.len(),
        "chat request"
    );

    let outcome = if request.config.stream {
        drive_stream(backend, &request, &controller, on_update).await
    } else {
        drive_single(backend, &request, &controller).await
    };

    match outcome {
        Outcome::Finished { text, usage } => {
            tracing::info!(
                backend = backend.name(),
                chars = text.len(),
                prompt_tokens = usage.map(|u| u.prompt_tokens),
                completion_tokens = usage.map(|u| u.completion_tokens),
                "chat finished"
            );
            on_finish(text, usage);
        }
        Outcome::Failed(err) => {
            if err.is_aborted() {
                tracing::info!(backend = backend.name(), "chat aborted by caller");
            } else {
                tracing::warn!(backend = backend.name(), error = %err, "chat failed");
            }
            match on_error {
                Some(f) => f(err),
                None => tracing::debug!("no on_error callback registered; error dropped"),
            }
        }
    }
    Ok(())
}

async fn drive_single<B>(backend: &B, request: &ChatRequest, controller: &AbortHandle) -> Outcome
where
    B: ChatBackend + ?Sized,
{
    let result = tokio::select! {
        biased;
        _ = controller.aborted() => return Outcome::Failed(LlmError::Aborted),
        r = backend.complete(request) => r,
    };
    if controller.is_aborted() {
        return Outcome::Failed(LlmError::Aborted);
    }
    match result {
        Ok(c) => Outcome::Finished {
            text: c.text,
            usage: c.usage,
        },
        Err(e) => Outcome::Failed(e),
    }
}

async fn drive_stream<B>(
    backend: &B,
    request: &ChatRequest,
    controller: &AbortHandle,
    mut on_update: Option<UpdateFn>,
) -> Outcome
where
    B: ChatBackend + ?Sized,
{
    let opened = tokio::select! {
        biased;
        _ = controller.aborted() => return Outcome::Failed(LlmError::Aborted),
        r = backend.open_stream(request) => r,
    };
    let mut stream = match opened {
        Ok(s) => s,
        Err(e) => return Outcome::Failed(e),
    };

    let mut text = String::new();
    let mut usage = None;
    let mut reasoning = ReasoningFormatter::default();
    // A malformed frame is only fatal when nothing follows it.
    let mut malformed: Option<LlmError> = None;

    loop {
        let next = tokio::select! {
            biased;
            _ = controller.aborted() => return Outcome::Failed(LlmError::Aborted),
            n = stream.next() => n,
        };
        let Some(item) = next else {
            break;
        };

        if let Some(err) = malformed.take() {
            tracing::warn!(backend = backend.name(), error = %err, "skipping malformed stream frame");
        }

        let delta = match item {
            Ok(StreamChunk::Delta { content }) if !content.is_empty() => reasoning.text(&content),
            Ok(StreamChunk::Thinking { content }) if !content.is_empty() => {
                reasoning.thinking(&content)
            }
            Ok(StreamChunk::Delta { .. }) | Ok(StreamChunk::Thinking { .. }) => continue,
            Ok(StreamChunk::Done { usage: u }) => {
                usage = u;
                break;
            }
            Err(e @ LlmError::Parse(_)) => {
                malformed = Some(e);
                continue;
            }
            Err(e) => return Outcome::Failed(e),
        };

        if controller.is_aborted() {
            return Outcome::Failed(LlmError::Aborted);
        }
        text.push_str(&delta);
        tracing::debug!(backend = backend.name(), delta_len = delta.len(), "stream delta");
        if let Some(f) = on_update.as_mut() {
            f(&text, &delta);
        }
    }

    if let Some(err) = malformed {
        return Outcome::Failed(err);
    }
    if controller.is_aborted() {
        return Outcome::Failed(LlmError::Aborted);
    }
    Outcome::Finished { text, usage }
}

/// Renders extended-thinking output as a quoted block ahead of the answer.
#[derive(Debug, Default)]
pub(crate) struct ReasoningFormatter {
    seen_thinking: bool,
    answer_started: bool,
}

impl ReasoningFormatter {
    pub(crate) fn thinking(&mut self, content: &str) -> String {
        let mut out = String::new();
        if !self.seen_thinking {
            self.seen_thinking = true;
            out.push_str(THINK_HEADER);
        }
        out.push_str(&content.replace('\n', "\n> "));
        out
    }

    pub(crate) fn text(&mut self, content: &str) -> String {
        if self.seen_thinking && !self.answer_started {
            self.answer_started = true;
            return format!("\n\n{content}");
        }
        content.to_string()
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LlmError {
    /// Usage error caught before any network call. Returned from `chat`
    /// directly rather than through `on_error`.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider error{}: {message}", status_suffix(.status))]
    Provider {
        status: Option<u16>,
        message: String,
    },

    #[error("stream parse error: {0}")]
    Parse(String),

    #[error("request aborted")]
    Aborted,
}

impl LlmError {
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            status: None,
            message: message.into(),
        }
    }

    /// Build a provider error from a non-success HTTP response body, keeping the
    /// provider's own message when the body is a recognizable JSON error.
    pub fn from_response(status: u16, body: &str) -> Self {
        let trimmed = body.trim();
        let message = serde_json::from_str::<serde_json::Value>(trimmed)
            .ok()
            .and_then(|v| error_summary(&v))
            .unwrap_or_else(|| {
                if trimmed.is_empty() {
                    "<empty body>".to_string()
                } else {
                    trimmed.to_string()
                }
            });
        Self::Provider {
            status: Some(status),
            message,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(s) => format!(" (status {s})"),
        None => String::new(),
    }
}

/// Pull a human-readable message out of the error shapes providers use:
/// `{"error":{"message":..}}`, `{"error":".."}`, `{"message":..}`.
pub(crate) fn error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value
                .get("error")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
        })
        .or_else(|| {
            value
                .get("Message")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
        })?;

    let collapsed = summary.split_whitespace().collect::<Vec<_>>().join(" ");
    Some(collapsed)
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

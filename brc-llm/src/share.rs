//! Publish a conversation to a ShareGPT-compatible service.

use crate::types::{ChatMessage, Role};
use serde::{Deserialize, Serialize};

const ATTRIBUTION: &str =
    "Share from [BRClient]: A chatbot client forked from https://github.com/Yidadaa/ChatGPT-Next-Web";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    /// POST target for new conversations.
    pub endpoint: String,
    /// Public links are `{link_base}/{id}`.
    pub link_base: String,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://sharegpt.com/api/conversations".to_string(),
            link_base: "https://shareg.pt".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SharePayload<'a> {
    avatar_url: Option<&'a str>,
    items: Vec<ShareItem>,
}

#[derive(Debug, Serialize, PartialEq)]
struct ShareItem {
    from: &'static str,
    value: String,
}

#[derive(Debug, Deserialize)]
struct ShareResponse {
    id: Option<String>,
}

fn share_items(messages: &[ChatMessage]) -> Vec<ShareItem> {
    let mut items: Vec<ShareItem> = messages
        .iter()
        .map(|m| ShareItem {
            from: if m.role == Role::User { "human" } else { "gpt" },
            value: m.text(),
        })
        .collect();
    items.push(ShareItem {
        from: "human",
        value: ATTRIBUTION.to_string(),
    });
    items
}

/// Upload `messages` and return the public link. Every failure is logged and
/// reported as `None`.
#[tracing::instrument(level = "info", skip_all, fields(messages = messages.len()))]
pub async fn share(
    http: &reqwest::Client,
    config: &ShareConfig,
    messages: &[ChatMessage],
    avatar_url: Option<&str>,
) -> Option<String> {
    let payload = SharePayload {
        avatar_url,
        items: share_items(messages),
    };

    let response = match http.post(&config.endpoint).json(&payload).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(%e, "share upload failed");
            return None;
        }
    };

    let status = response.status();
    let body = match response.text().await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(%e, %status, "share response unreadable");
            return None;
        }
    };
    if !status.is_success() {
        tracing::warn!(%status, body = %body, "share service rejected upload");
        return None;
    }

    let id = match serde_json::from_str::<ShareResponse>(&body) {
        Ok(ShareResponse { id: Some(id) }) if !id.trim().is_empty() => id,
        Ok(_) => {
            tracing::warn!(body = %body, "share response has no id");
            return None;
        }
        Err(e) => {
            tracing::warn!(%e, body = %body, "share response is not json");
            return None;
        }
    };

    Some(format!("{}/{id}", config.link_base.trim_end_matches('/')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentPart, ImageUrl, MessageContent};

    #[test]
    fn items_map_roles_and_append_attribution() {
        let items = share_items(&[
            ChatMessage::system("sys"),
            ChatMessage::user("question"),
            ChatMessage::new(
                Role::Assistant,
                MessageContent::Parts(vec![
                    ContentPart::Text {
                        text: "answer".to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: "data:image/png;base64,AA".to_string(),
                        },
                    },
                ]),
            ),
        ]);

        let froms: Vec<&str> = items.iter().map(|i| i.from).collect();
        assert_eq!(froms, vec!["gpt", "human", "gpt", "human"]);
        assert_eq!(items[2].value, "answer");
        assert_eq!(items[3].value, ATTRIBUTION);
    }

    #[test]
    fn payload_uses_camel_case_keys() {
        let payload = SharePayload {
            avatar_url: Some("https://example.com/me.png"),
            items: share_items(&[]),
        };
        let v = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(v["avatarUrl"], "https://example.com/me.png");
        assert_eq!(v["items"].as_array().map(Vec::len), Some(1));
    }
}

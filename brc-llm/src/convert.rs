//! Provider-independent cleanup applied before Claude-family wire encoding.
//!
//! Claude rejects empty text blocks, consecutive turns with the same role, and
//! conversations that open with an assistant turn; `normalize` repairs all
//! three and pulls the system prompt out of the message list.

use crate::types::{AttachmentDocument, ChatMessage, ContentPart, Role};

pub(crate) const EMPTY_TEXT_PLACEHOLDER: &str = "' '";
pub(crate) const EMPTY_SYSTEM_PLACEHOLDER: &str = "'.'";
pub(crate) const LEADING_USER_TEXT: &str = "hi";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Conversation {
    pub system: Option<String>,
    pub turns: Vec<Turn>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Part {
    Text(String),
    Image(InlineImage),
    Document(AttachmentDocument),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct InlineImage {
    /// e.g. "image/png"
    pub media_type: String,
    /// Base64 payload exactly as it appeared in the data URL.
    pub data: String,
}

impl InlineImage {
    /// Short format name ("png", "jpeg") derived from the media type.
    pub fn format(&self) -> &str {
        self.media_type
            .split_once('/')
            .map(|(_, sub)| sub)
            .unwrap_or(&self.media_type)
    }
}

/// Split `data:<media-type>;base64,<payload>`.
pub(crate) fn parse_data_url(url: &str) -> Option<InlineImage> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let media_type = meta.split(';').next()?.trim();
    if media_type.is_empty() || data.is_empty() {
        return None;
    }
    Some(InlineImage {
        media_type: media_type.to_string(),
        data: data.to_string(),
    })
}

pub(crate) fn normalize(messages: &[ChatMessage], vision: bool) -> Conversation {
    let mut system: Option<String> = None;
    let mut turns: Vec<Turn> = Vec::new();

    for m in messages {
        if m.role == Role::System {
            if system.is_some() {
                tracing::debug!("dropping additional system message; only the first is sent");
                continue;
            }
            let text = m.text();
            system = Some(if text.trim().is_empty() {
                EMPTY_SYSTEM_PLACEHOLDER.to_string()
            } else {
                text
            });
            continue;
        }

        let mut parts = to_parts(m, vision);
        if parts.is_empty() {
            parts.push(Part::Text(EMPTY_TEXT_PLACEHOLDER.to_string()));
        }

        match turns.last_mut() {
            Some(prev) if prev.role == m.role => prev.parts.extend(parts),
            _ => turns.push(Turn {
                role: m.role,
                parts,
            }),
        }
    }

    if turns.first().is_some_and(|t| t.role == Role::Assistant) {
        turns.insert(
            0,
            Turn {
                role: Role::User,
                parts: vec![Part::Text(LEADING_USER_TEXT.to_string())],
            },
        );
    }

    Conversation { system, turns }
}

fn to_parts(m: &ChatMessage, vision: bool) -> Vec<Part> {
    if !vision {
        return vec![Part::Text(non_empty(m.text()))];
    }

    let mut out = Vec::new();
    for part in m.content.parts() {
        match part {
            ContentPart::Text { text } => out.push(Part::Text(non_empty(text))),
            ContentPart::ImageUrl { image_url } => match parse_data_url(&image_url.url) {
                Some(image) => out.push(Part::Image(image)),
                None => {
                    tracing::warn!("skipping image that is not an inline base64 data URL");
                }
            },
            ContentPart::Doc { doc } => out.push(Part::Document(doc)),
        }
    }
    out
}

fn non_empty(text: String) -> String {
    if text.is_empty() {
        EMPTY_TEXT_PLACEHOLDER.to_string()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocumentSource, ImageUrl, MessageContent};

    fn texts(turn: &Turn) -> Vec<&str> {
        turn.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn first_system_message_wins_and_empty_becomes_placeholder() {
        let conv = normalize(
            &[
                ChatMessage::system(""),
                ChatMessage::system("ignored"),
                ChatMessage::user("hello"),
            ],
            true,
        );
        assert_eq!(conv.system.as_deref(), Some("'.'"));
        assert_eq!(conv.turns.len(), 1);
    }

    #[test]
    fn consecutive_roles_are_merged_and_empty_text_replaced() {
        let conv = normalize(
            &[
                ChatMessage::user("a"),
                ChatMessage::user(""),
                ChatMessage::assistant("b"),
                ChatMessage::assistant("c"),
            ],
            true,
        );
        assert_eq!(conv.system, None);
        assert_eq!(conv.turns.len(), 2);
        assert_eq!(texts(&conv.turns[0]), vec!["a", EMPTY_TEXT_PLACEHOLDER]);
        assert_eq!(texts(&conv.turns[1]), vec!["b", "c"]);
    }

    #[test]
    fn leading_assistant_gets_synthetic_user_turn() {
        let conv = normalize(&[ChatMessage::assistant("hi there")], true);
        assert_eq!(conv.turns.len(), 2);
        assert_eq!(conv.turns[0].role, Role::User);
        assert_eq!(texts(&conv.turns[0]), vec![LEADING_USER_TEXT]);
    }

    #[test]
    fn multimodal_parts_survive_only_for_vision_models() {
        let msg = ChatMessage::new(
            Role::User,
            MessageContent::Parts(vec![
                ContentPart::Text {
                    text: "what is this".to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: "data:image/jpeg;base64,/9j/AA==".to_string(),
                    },
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: "https://example.com/cat.png".to_string(),
                    },
                },
                ContentPart::Doc {
                    doc: AttachmentDocument {
                        name: "notes".to_string(),
                        format: "txt".to_string(),
                        size: Some(2),
                        source: DocumentSource {
                            bytes: b"hi".to_vec(),
                        },
                    },
                },
            ]),
        );

        let vision = normalize(std::slice::from_ref(&msg), true);
        let parts = &vision.turns[0].parts;
        assert_eq!(parts.len(), 3);
        match &parts[1] {
            Part::Image(img) => {
                assert_eq!(img.media_type, "image/jpeg");
                assert_eq!(img.format(), "jpeg");
                assert_eq!(img.data, "/9j/AA==");
            }
            other => panic!("expected image, got {other:?}"),
        }
        assert!(matches!(parts[2], Part::Document(_)));

        let text_only = normalize(&[msg], false);
        assert_eq!(text_only.turns[0].parts, vec![Part::Text("what is this".to_string())]);
    }

    #[test]
    fn data_url_parsing_rejects_malformed_input() {
        assert!(parse_data_url("data:image/png;base64,").is_none());
        assert!(parse_data_url("data:;base64,AAAA").is_none());
        assert!(parse_data_url("image/png;base64,AAAA").is_none());
    }
}

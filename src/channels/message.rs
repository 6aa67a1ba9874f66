//! OneBot v11 wire types
//!
//! Inbound frames are decoded into [`ChatEvent`]s; replies are encoded as
//! [`OutboundAction`] frames (`{"action": ..., "params": {...}}`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// One segment of a chat message (`{"type": "text", "data": {"text": "hi"}}`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSegment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl MessageSegment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            data: serde_json::json!({ "text": text.into() }),
        }
    }

    /// Text payload, only for `text` segments
    pub fn as_text(&self) -> Option<&str> {
        if self.kind != "text" {
            return None;
        }
        self.data.get("text").and_then(|t| t.as_str())
    }
}

/// `message` is either a segment array or a plain string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum MessageBody {
    Segments(Vec<MessageSegment>),
    Plain(String),
}

impl Default for MessageBody {
    fn default() -> Self {
        MessageBody::Segments(Vec::new())
    }
}

impl From<MessageBody> for Vec<MessageSegment> {
    fn from(body: MessageBody) -> Self {
        match body {
            MessageBody::Segments(segments) => segments,
            MessageBody::Plain(text) => vec![MessageSegment::text(text)],
        }
    }
}

/// Loosely-typed inbound frame; every field is optional on the wire.
#[derive(Debug, Deserialize)]
struct RawFrame {
    post_type: Option<String>,
    message_type: Option<String>,
    user_id: Option<i64>,
    group_id: Option<i64>,
    #[serde(default)]
    sub_type: String,
    #[serde(default)]
    to_me: bool,
    #[serde(default)]
    message: MessageBody,
}

/// Private (one-to-one) message event
#[derive(Debug, Clone, PartialEq)]
pub struct PrivateMessage {
    pub user_id: i64,
    /// "friend", "group" (temporary session), "other"
    pub sub_type: String,
    pub segments: Vec<MessageSegment>,
}

/// Group message event
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMessage {
    pub group_id: i64,
    pub user_id: i64,
    pub sub_type: String,
    /// Whether the bot was @-mentioned
    pub to_me: bool,
    pub segments: Vec<MessageSegment>,
}

/// A chat event accepted from the gateway
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Private(PrivateMessage),
    Group(GroupMessage),
}

impl ChatEvent {
    /// Decode a gateway frame.
    ///
    /// Returns `None` for anything that is not a private or group message
    /// event (meta events, notices, action responses, malformed frames).
    pub fn from_frame(frame: &serde_json::Value) -> Option<Self> {
        let raw: RawFrame = match serde_json::from_value(frame.clone()) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring undecodable gateway frame");
                return None;
            }
        };

        if raw.post_type.as_deref() != Some("message") {
            return None;
        }

        let user_id = raw.user_id?;
        match raw.message_type.as_deref() {
            Some("private") => Some(ChatEvent::Private(PrivateMessage {
                user_id,
                sub_type: raw.sub_type,
                segments: raw.message.into(),
            })),
            Some("group") => Some(ChatEvent::Group(GroupMessage {
                group_id: raw.group_id?,
                user_id,
                sub_type: raw.sub_type,
                to_me: raw.to_me,
                segments: raw.message.into(),
            })),
            _ => None,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            ChatEvent::Private(_) => MessageKind::Private,
            ChatEvent::Group(_) => MessageKind::Group,
        }
    }

    pub fn user_id(&self) -> i64 {
        match self {
            ChatEvent::Private(m) => m.user_id,
            ChatEvent::Group(m) => m.user_id,
        }
    }

    pub fn segments(&self) -> &[MessageSegment] {
        match self {
            ChatEvent::Private(m) => &m.segments,
            ChatEvent::Group(m) => &m.segments,
        }
    }

    /// Concatenated text segments, trimmed
    pub fn text(&self) -> String {
        let text: String = self
            .segments()
            .iter()
            .filter_map(MessageSegment::as_text)
            .collect();
        text.trim().to_string()
    }

    /// Dedup identity of the conversation this event belongs to
    pub fn conversation_key(&self) -> ConversationKey {
        match self {
            ChatEvent::Private(m) => ConversationKey {
                kind: MessageKind::Private,
                user_id: m.user_id,
                group_id: None,
            },
            ChatEvent::Group(m) => ConversationKey {
                kind: MessageKind::Group,
                user_id: m.user_id,
                group_id: Some(m.group_id),
            },
        }
    }

    /// Where replies to this event go
    pub fn reply_target(&self) -> ReplyTarget {
        match self {
            ChatEvent::Private(m) => ReplyTarget::Private { user_id: m.user_id },
            ChatEvent::Group(m) => ReplyTarget::Group {
                group_id: m.group_id,
            },
        }
    }
}

/// Message kind, as named by OneBot's `message_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Private,
    Group,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Private => "private",
            MessageKind::Group => "group",
        }
    }
}

/// `(message_type, sender, group-or-"private")`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub kind: MessageKind,
    pub user_id: i64,
    pub group_id: Option<i64>,
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.group_id {
            Some(group_id) => write!(f, "{}_{}_{}", self.kind.as_str(), self.user_id, group_id),
            None => write!(f, "{}_{}_private", self.kind.as_str(), self.user_id),
        }
    }
}

/// Destination of an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyTarget {
    Private { user_id: i64 },
    Group { group_id: i64 },
}

impl ReplyTarget {
    pub fn into_action(self, message: impl Into<String>) -> OutboundAction {
        let message = message.into();
        match self {
            ReplyTarget::Private { user_id } => OutboundAction::SendPrivateMsg { user_id, message },
            ReplyTarget::Group { group_id } => OutboundAction::SendGroupMsg { group_id, message },
        }
    }
}

impl fmt::Display for ReplyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyTarget::Private { user_id } => write!(f, "private:{}", user_id),
            ReplyTarget::Group { group_id } => write!(f, "group:{}", group_id),
        }
    }
}

/// Outbound OneBot action frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", content = "params", rename_all = "snake_case")]
pub enum OutboundAction {
    SendPrivateMsg { user_id: i64, message: String },
    SendGroupMsg { group_id: i64, message: String },
}

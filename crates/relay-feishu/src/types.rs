//! Wire shapes of the Feishu event-callback API (schema 2.0).

use serde::Deserialize;

pub const MESSAGE_RECEIVE_EVENT: &str = "im.message.receive_v1";

/// Outer body of every callback POST: either a `url_verification`
/// handshake or an event with a header.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackEnvelope {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub challenge: Option<String>,
    /// Verification token on handshakes and schema 1.0 events.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub header: Option<EventHeader>,
    #[serde(default)]
    pub event: Option<serde_json::Value>,
    /// Present when the app has an encrypt key configured.
    #[serde(default)]
    pub encrypt: Option<String>,
}

impl CallbackEnvelope {
    pub fn is_url_verification(&self) -> bool {
        self.kind.as_deref() == Some("url_verification")
    }

    /// Token from the event header, falling back to the top-level field.
    pub fn verification_token(&self) -> Option<&str> {
        self.header
            .as_ref()
            .and_then(|h| h.token.as_deref())
            .or(self.token.as_deref())
    }

    pub fn event_type(&self) -> Option<&str> {
        self.header.as_ref().map(|h| h.event_type.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventHeader {
    #[serde(default)]
    pub event_id: Option<String>,
    pub event_type: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserIds {
    #[serde(default)]
    pub open_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub union_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEvent {
    pub sender: EventSender,
    pub message: EventMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventSender {
    #[serde(default)]
    pub sender_id: UserIds,
    #[serde(default)]
    pub sender_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    pub message_id: String,
    #[serde(default)]
    pub root_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub chat_id: String,
    /// `p2p` or `group`.
    pub chat_type: String,
    pub message_type: String,
    /// JSON-encoded content; its shape depends on `message_type`.
    pub content: String,
    #[serde(default)]
    pub mentions: Vec<Mention>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Mention {
    /// Placeholder in the text, e.g. `@_user_1`.
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub id: UserIds,
    #[serde(default)]
    pub name: String,
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RelayError;

/// Whether a conversation is a 1:1 chat or a group room.
///
/// Serialized with the platform's own spelling (`p2p` / `group`) so fixtures
/// and stored rows stay readable next to raw events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatKind {
    #[serde(rename = "p2p")]
    Direct,
    #[serde(rename = "group")]
    Group,
}

impl ChatKind {
    pub fn is_group(self) -> bool {
        matches!(self, ChatKind::Group)
    }
}

/// One inbound platform event, normalized.
///
/// Built once by the platform parser and consumed exactly once by the
/// dispatcher. `text` already has bot mentions stripped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub chat_id: String,
    pub chat_kind: ChatKind,
    /// Globally unique per platform; the dedup key.
    pub message_id: String,

    pub sender_open_id: Option<String>,
    pub sender_user_id: Option<String>,
    pub sender_name: Option<String>,

    pub message_type: String,
    pub raw_content: String,
    pub text: String,

    pub mentioned_bot: bool,
    pub reply_to_message_id: Option<String>,
}

impl InboundMessage {
    /// Minimal text message, mostly useful for tests and replay tooling.
    pub fn text(
        chat_id: impl Into<String>,
        chat_kind: ChatKind,
        message_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let text = text.into();
        Self {
            chat_id: chat_id.into(),
            chat_kind,
            message_id: message_id.into(),
            sender_open_id: None,
            sender_user_id: None,
            sender_name: None,
            message_type: "text".to_string(),
            raw_content: serde_json::json!({ "text": text }).to_string(),
            text,
            mentioned_bot: false,
            reply_to_message_id: None,
        }
    }

    pub fn with_sender(mut self, open_id: impl Into<String>) -> Self {
        self.sender_open_id = Some(open_id.into());
        self
    }

    pub fn with_mention(mut self, mentioned: bool) -> Self {
        self.mentioned_bot = mentioned;
        self
    }
}

/// Access level handed to the agent process for a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxMode {
    #[default]
    ReadOnly,
    WorkspaceWrite,
}

impl SandboxMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxMode::ReadOnly => "read-only",
            SandboxMode::WorkspaceWrite => "workspace-write",
        }
    }
}

impl fmt::Display for SandboxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SandboxMode {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read-only" => Ok(SandboxMode::ReadOnly),
            "workspace-write" => Ok(SandboxMode::WorkspaceWrite),
            other => Err(RelayError::InvalidValue {
                field: "sandbox",
                value: other.to_string(),
            }),
        }
    }
}

/// Requested reply rendering. `Auto` picks per reply based on content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    Raw,
    Card,
    #[default]
    Auto,
}

/// Rendering actually applied to every chunk of one reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyMode {
    Raw,
    Card,
}

impl fmt::Display for ReplyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyMode::Raw => f.write_str("raw"),
            ReplyMode::Card => f.write_str("card"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_kind_uses_platform_spelling() {
        assert_eq!(serde_json::to_string(&ChatKind::Direct).unwrap(), r#""p2p""#);
        let kind: ChatKind = serde_json::from_str(r#""group""#).unwrap();
        assert_eq!(kind, ChatKind::Group);
    }

    #[test]
    fn sandbox_mode_parses_and_displays() {
        assert_eq!(
            "workspace-write".parse::<SandboxMode>().unwrap(),
            SandboxMode::WorkspaceWrite
        );
        assert_eq!(SandboxMode::ReadOnly.to_string(), "read-only");
        assert!("full-access".parse::<SandboxMode>().is_err());
    }

    #[test]
    fn text_builder_fills_raw_content() {
        let msg = InboundMessage::text("c1", ChatKind::Group, "m1", "hi").with_mention(true);
        assert_eq!(msg.raw_content, r#"{"text":"hi"}"#);
        assert!(msg.mentioned_bot);
        assert!(msg.sender_open_id.is_none());
    }
}

use serde::{Deserialize, Serialize};

use relay_core::ReplyMode;

/// Opaque reference to a "received" signal placed on an inbound message,
/// e.g. an emoji reaction. Handed back to the adapter to clear it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckHandle {
    pub message_id: String,
    pub reaction_id: Option<String>,
}

/// One rendered reply: every chunk is delivered in order, in `mode`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRequest {
    pub chat_id: String,
    pub reply_to_message_id: Option<String>,
    pub mode: ReplyMode,
    pub chunks: Vec<String>,
}

/// Runtime connection state of an inbound transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportStatus {
    /// Fully connected and delivering events.
    Connected,

    /// Attempting to establish or re-establish the connection.
    Connecting,

    /// Cleanly disconnected (not an error condition).
    Disconnected,

    /// The last connection attempt failed.
    Error(String),
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use relay_core::SandboxMode;

/// Latest agent state for one conversation.
///
/// One row per `chat_id`, replaced wholesale after every successful agent
/// turn so the next message resumes the same agent thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub chat_id: String,
    pub workspace: String,
    /// `None` until the agent has reported a thread for this conversation.
    pub thread_id: Option<String>,
    pub sandbox: SandboxMode,
    pub updated_at: DateTime<Utc>,
}

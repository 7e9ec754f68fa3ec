use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use relay_channels::{AckHandle, ChannelError, ReplyRequest, SendAdapter};
use relay_core::ReplyMode;

use crate::api::FeishuApi;

/// `msg_type` plus JSON-encoded `content`, ready for message create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub msg_type: &'static str,
    pub content: String,
}

/// Rich-text post with a single markdown element.
pub fn post_markdown(text: &str) -> OutgoingMessage {
    OutgoingMessage {
        msg_type: "post",
        content: json!({
            "zh_cn": { "content": [[{ "tag": "md", "text": text }]] }
        })
        .to_string(),
    }
}

/// Interactive card with a single markdown element.
pub fn markdown_card(text: &str) -> OutgoingMessage {
    OutgoingMessage {
        msg_type: "interactive",
        content: json!({
            "config": { "wide_screen_mode": true },
            "elements": [{ "tag": "markdown", "content": text }]
        })
        .to_string(),
    }
}

pub fn progress_message(text: &str) -> OutgoingMessage {
    post_markdown(&format!("[progress] {text}"))
}

/// Send adapter over the Feishu REST API.
///
/// Replies are posted as top-level messages so they show in the main chat
/// timeline; the "received" signal is an emoji reaction on the inbound
/// message.
pub struct FeishuSender {
    api: Arc<FeishuApi>,
    ack_emoji: String,
}

impl FeishuSender {
    pub fn new(api: Arc<FeishuApi>, ack_emoji: impl Into<String>) -> Self {
        Self {
            api,
            ack_emoji: ack_emoji.into(),
        }
    }

    async fn post(&self, chat_id: &str, message: OutgoingMessage) -> Result<(), ChannelError> {
        self.api
            .create_message(chat_id, message.msg_type, &message.content)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SendAdapter for FeishuSender {
    async fn ack_received(&self, message_id: &str) -> Result<Option<AckHandle>, ChannelError> {
        let reaction_id = self.api.add_reaction(message_id, &self.ack_emoji).await?;
        Ok(Some(AckHandle {
            message_id: message_id.to_string(),
            reaction_id,
        }))
    }

    async fn clear_ack(&self, ack: &AckHandle) -> Result<(), ChannelError> {
        let Some(reaction_id) = ack.reaction_id.as_deref() else {
            return Ok(());
        };
        self.api.delete_reaction(&ack.message_id, reaction_id).await?;
        Ok(())
    }

    async fn send_progress(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        self.post(chat_id, progress_message(text)).await
    }

    async fn send_reply(&self, reply: &ReplyRequest) -> Result<(), ChannelError> {
        for (i, chunk) in reply.chunks.iter().enumerate() {
            let message = match reply.mode {
                ReplyMode::Card => markdown_card(chunk),
                ReplyMode::Raw => post_markdown(chunk),
            };
            self.post(&reply.chat_id, message).await?;
            debug!(chat_id = %reply.chat_id, chunk = i + 1, total = reply.chunks.len(), "reply chunk sent");
        }
        Ok(())
    }
}

use async_trait::async_trait;

use crate::{
    error::ChannelError,
    types::{AckHandle, ReplyRequest},
};

/// Outbound side of a chat platform, as seen by the message pipeline.
///
/// Only `send_reply` is load-bearing. The other three are UX signals: the
/// pipeline calls them fire-and-forget and ignores their errors.
#[async_trait]
pub trait SendAdapter: Send + Sync {
    /// Mark `message_id` as received (e.g. add a typing reaction).
    ///
    /// `Ok(None)` means the platform produced nothing that needs clearing.
    async fn ack_received(&self, message_id: &str) -> Result<Option<AckHandle>, ChannelError>;

    /// Remove a signal previously returned by [`SendAdapter::ack_received`].
    async fn clear_ack(&self, ack: &AckHandle) -> Result<(), ChannelError>;

    /// Post an interim stage update while the agent works.
    async fn send_progress(&self, chat_id: &str, text: &str) -> Result<(), ChannelError>;

    /// Deliver every chunk of `reply`, in order, one platform call each.
    async fn send_reply(&self, reply: &ReplyRequest) -> Result<(), ChannelError>;
}

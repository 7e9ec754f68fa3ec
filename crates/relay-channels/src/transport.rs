use async_trait::async_trait;

use relay_core::InboundMessage;

use crate::{error::ChannelError, types::TransportStatus};

/// Where a transport hands parsed inbound messages.
///
/// Implemented by the dispatcher; the transport never awaits the full
/// processing of a message on its own receive path.
#[async_trait]
pub trait InboundSink: Send + Sync {
    async fn dispatch(&self, inbound: InboundMessage);
}

/// Inbound side of a chat platform (event stream, webhook listener, …).
///
/// Implementations must be `Send + Sync` so they can be driven from a
/// background Tokio task.
#[async_trait]
pub trait InboundTransport: Send + Sync {
    /// Stable lowercase identifier used in logs (e.g. `"feishu-webhook"`).
    fn name(&self) -> &str;

    /// Establish the connection. One attempt; the retry loop owns retries.
    ///
    /// Implementations should transition to [`TransportStatus::Connected`]
    /// on success.
    async fn connect(&mut self) -> Result<(), ChannelError>;

    /// Gracefully close the connection.
    async fn disconnect(&mut self) -> Result<(), ChannelError>;

    /// Return the current runtime status without blocking.
    fn status(&self) -> TransportStatus;
}

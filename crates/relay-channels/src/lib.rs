pub mod backoff;
pub mod error;
pub mod retry;
pub mod send;
pub mod transport;
pub mod types;

pub use backoff::{reconnect_backoff_ms, BackoffConfig};
pub use error::ChannelError;
pub use retry::connect_with_retry;
pub use send::SendAdapter;
pub use transport::{InboundSink, InboundTransport};
pub use types::{AckHandle, ReplyRequest, TransportStatus};

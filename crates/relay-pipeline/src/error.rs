use thiserror::Error;

use relay_agent::AgentError;
use relay_channels::ChannelError;
use relay_store::StoreError;

use crate::queue::QueueError;

/// Failures that escape the per-message pipeline.
///
/// Policy denials and workspace rejections are not errors; they end in
/// [`crate::Outcome`] values instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Transient agent failure; the message is left unprocessed.
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The reply could not be delivered; the message is left unprocessed.
    #[error("reply delivery failed: {0}")]
    Delivery(#[source] ChannelError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl PipelineError {
    /// Short code for log fields.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Agent(AgentError::Timeout { .. }) => "AGENT_TIMEOUT",
            PipelineError::Agent(AgentError::Exit { .. }) => "AGENT_EXIT",
            PipelineError::Agent(_) => "AGENT_ERROR",
            PipelineError::Store(_) => "STORE_ERROR",
            PipelineError::Delivery(_) => "DELIVERY_FAILED",
            PipelineError::Queue(_) => "QUEUE_ERROR",
        }
    }
}

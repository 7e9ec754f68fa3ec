use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use relay_channels::InboundSink;
use relay_core::InboundMessage;

use crate::error::PipelineError;
use crate::handle::{handle_inbound, Outcome, PipelineDeps};
use crate::queue::SerialQueue;

/// Routes every inbound message through its conversation's queue slot and
/// runs the full pipeline there.
pub struct InboundDispatcher {
    deps: Arc<PipelineDeps>,
    queue: SerialQueue,
}

impl InboundDispatcher {
    pub fn new(deps: PipelineDeps) -> Self {
        Self {
            deps: Arc::new(deps),
            queue: SerialQueue::new(),
        }
    }

    /// Process `inbound` after every earlier message of the same chat and
    /// return its terminal state.
    ///
    /// Agent and delivery failures come back as `Err` here; callers that need
    /// to react to them (replay, tests) use this rather than `dispatch`.
    pub async fn submit(&self, inbound: InboundMessage) -> Result<Outcome, PipelineError> {
        let deps = Arc::clone(&self.deps);
        let key = inbound.chat_id.clone();
        self.queue
            .enqueue(&key, async move { handle_inbound(&deps, &inbound).await })
            .await?
    }
}

/// Entry point for transports: runs [`InboundDispatcher::submit`] and logs
/// the result. Failures are not propagated; the message stays unprocessed so
/// a redelivery can retry it.
#[async_trait]
impl InboundSink for InboundDispatcher {
    async fn dispatch(&self, inbound: InboundMessage) {
        let chat_id = inbound.chat_id.clone();
        let message_id = inbound.message_id.clone();
        match self.submit(inbound).await {
            Ok(outcome) => {
                debug!(chat_id = %chat_id, message_id = %message_id, ?outcome, "dispatch finished")
            }
            Err(e) => error!(
                chat_id = %chat_id,
                message_id = %message_id,
                code = e.code(),
                error = %e,
                "dispatch failed"
            ),
        }
    }
}

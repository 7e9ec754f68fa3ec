use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use relay_agent::metadata::format_thread_title;
use relay_agent::prompt::build_prompt;
use relay_agent::{AgentAdapter, AgentRequest, ProgressSink, ThreadMetadataSync};
use relay_channels::{AckHandle, ReplyRequest, SendAdapter};
use relay_core::{InboundMessage, RelayConfig};
use relay_store::RelayStore;

use crate::error::PipelineError;
use crate::policy::{self, AccessDecision, DenyReason};
use crate::render::render;
use crate::workspace;

const ACCEPTED_TEXT: &str = "Task accepted, starting execution";

/// Upper bound on waiting for queued progress updates before the reply.
const PROGRESS_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything one message needs on its way through the pipeline.
pub struct PipelineDeps {
    pub config: Arc<RelayConfig>,
    pub store: Arc<RelayStore>,
    pub agent: Arc<dyn AgentAdapter>,
    pub sender: Arc<dyn SendAdapter>,
    pub metadata: Option<Arc<dyn ThreadMetadataSync>>,
    /// Caps concurrent agent turns across all conversations.
    pub agent_permits: Arc<Semaphore>,
}

impl PipelineDeps {
    pub fn new(
        config: Arc<RelayConfig>,
        store: Arc<RelayStore>,
        agent: Arc<dyn AgentAdapter>,
        sender: Arc<dyn SendAdapter>,
    ) -> Self {
        let permits = config.codex.max_concurrency.max(1);
        Self {
            config,
            store,
            agent,
            sender,
            metadata: None,
            agent_permits: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn ThreadMetadataSync>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Terminal state of one handled message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    AlreadyHandled,
    Denied(DenyReason),
    WorkspaceRejected { workspace: String },
    Delivered { thread_id: String, chunks: usize },
}

/// Drive one inbound message to a terminal state.
///
/// Must run inside the message's conversation slot of the serial queue.
/// Agent and delivery failures are returned without marking the message
/// processed, so a redelivery can try again.
#[instrument(skip_all, fields(chat_id = %inbound.chat_id, message_id = %inbound.message_id))]
pub async fn handle_inbound(
    deps: &PipelineDeps,
    inbound: &InboundMessage,
) -> Result<Outcome, PipelineError> {
    let cfg = &deps.config;
    let store = &deps.store;

    if store.is_processed(&inbound.message_id)? {
        debug!("message already handled, skipping");
        return Ok(Outcome::AlreadyHandled);
    }

    if let AccessDecision::Denied {
        reason,
        record_only,
    } = policy::evaluate(&cfg.policy, inbound)
    {
        store.mark_processed(&inbound.message_id, &inbound.chat_id, Utc::now())?;
        info!(reason = %reason, record_only, "message denied by policy");
        return Ok(Outcome::Denied(reason));
    }

    let workspace = workspace::resolve(&cfg.routing, &inbound.chat_id).to_string();
    if !workspace::is_allowed(&cfg.routing, &workspace) {
        store.mark_processed(&inbound.message_id, &inbound.chat_id, Utc::now())?;
        warn!(workspace = %workspace, "workspace not in allowlist, message dropped");
        return Ok(Outcome::WorkspaceRejected { workspace });
    }

    let ack = spawn_ack(Arc::clone(&deps.sender), inbound.message_id.clone());

    let (thread_id, sandbox) = match store.get_session(&inbound.chat_id)? {
        Some(session) => (session.thread_id, session.sandbox),
        None => (None, cfg.codex.sandbox_default),
    };

    let (progress, forwarder) = if cfg.reply.progress {
        let (tx, handle) = spawn_progress(Arc::clone(&deps.sender), inbound.chat_id.clone());
        (Some(tx), Some(handle))
    } else {
        (None, None)
    };

    let request = AgentRequest {
        thread_id,
        workspace: workspace.clone(),
        sandbox,
        prompt: build_prompt(inbound),
        progress,
    };
    let result = {
        let _permit = deps.agent_permits.acquire().await.ok();
        deps.agent.invoke(request).await
    };
    // The request owned the last sender half, so the forwarder now only has
    // queued updates left.
    if let Some(forwarder) = forwarder {
        drain_progress(forwarder).await;
    }
    let reply = match result {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "agent failed, message left unprocessed");
            return Err(e.into());
        }
    };

    store.upsert_session(
        &inbound.chat_id,
        &workspace,
        Some(&reply.thread_id),
        sandbox,
        Utc::now(),
    )?;
    if let Some(metadata) = &deps.metadata {
        sync_metadata(
            Arc::clone(metadata),
            reply.thread_id.clone(),
            format_thread_title(inbound),
        );
    }

    let rendered = render(&reply.final_text, cfg.reply.render_mode, cfg.reply.chunk_limit);
    let chunk_count = rendered.chunks.len();
    let reply_request = ReplyRequest {
        chat_id: inbound.chat_id.clone(),
        reply_to_message_id: Some(inbound.message_id.clone()),
        mode: rendered.mode,
        chunks: rendered.chunks,
    };
    if let Err(e) = deps.sender.send_reply(&reply_request).await {
        warn!(error = %e, "reply delivery failed, message left unprocessed");
        return Err(PipelineError::Delivery(e));
    }

    spawn_clear_ack(Arc::clone(&deps.sender), ack);
    store.mark_processed(&inbound.message_id, &inbound.chat_id, Utc::now())?;

    info!(
        thread_id = %reply.thread_id,
        chunks = chunk_count,
        mode = %reply_request.mode,
        "reply delivered"
    );
    Ok(Outcome::Delivered {
        thread_id: reply.thread_id,
        chunks: chunk_count,
    })
}

fn spawn_ack(sender: Arc<dyn SendAdapter>, message_id: String) -> JoinHandle<Option<AckHandle>> {
    tokio::spawn(async move {
        match sender.ack_received(&message_id).await {
            Ok(handle) => handle,
            Err(e) => {
                debug!(error = %e, "ack signal failed");
                None
            }
        }
    })
}

/// Clear the ack once it resolves. Only called after a reply went out.
fn spawn_clear_ack(sender: Arc<dyn SendAdapter>, ack: JoinHandle<Option<AckHandle>>) {
    tokio::spawn(async move {
        let Ok(Some(handle)) = ack.await else {
            return;
        };
        if let Err(e) = sender.clear_ack(&handle).await {
            debug!(error = %e, "clearing ack signal failed");
        }
    });
}

/// Forward stage texts to the chat in order, skipping consecutive repeats.
/// The forwarder ends when every sender half is dropped.
fn spawn_progress(sender: Arc<dyn SendAdapter>, chat_id: String) -> (ProgressSink, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let handle = tokio::spawn(async move {
        let mut last: Option<String> = None;
        while let Some(text) = rx.recv().await {
            if last.as_deref() == Some(text.as_str()) {
                continue;
            }
            if let Err(e) = sender.send_progress(&chat_id, &text).await {
                debug!(error = %e, "progress update failed");
            }
            last = Some(text);
        }
    });
    let _ = tx.send(ACCEPTED_TEXT.to_string());
    (tx, handle)
}

/// Let queued progress updates go out before the reply. An agent that kept
/// a sender alive, or a slow platform, only costs the timeout; the forwarder
/// keeps running detached.
async fn drain_progress(forwarder: JoinHandle<()>) {
    if tokio::time::timeout(PROGRESS_DRAIN_TIMEOUT, forwarder).await.is_err() {
        debug!("progress updates still pending, sending reply anyway");
    }
}

fn sync_metadata(metadata: Arc<dyn ThreadMetadataSync>, thread_id: String, title: String) {
    tokio::task::spawn_blocking(move || {
        if let Err(e) = metadata.record_thread_title(&thread_id, &title) {
            debug!(thread_id = %thread_id, error = %e, "recording thread title failed");
        }
        if let Err(e) = metadata.normalize_session_metadata(&thread_id) {
            debug!(thread_id = %thread_id, error = %e, "normalizing session metadata failed");
        }
    });
}

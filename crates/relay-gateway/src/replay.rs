//! Offline run of the pipeline for one recorded event.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use tracing::info;

use relay_channels::{AckHandle, ChannelError, ReplyRequest, SendAdapter};
use relay_core::RelayConfig;
use relay_feishu::{parse_message_event, CallbackEnvelope, MessageEvent};
use relay_pipeline::{InboundDispatcher, PipelineDeps};
use relay_store::RelayStore;

use crate::app::{build_agent, load_config};
use crate::AgentOpts;

/// Collects reply chunks instead of posting them.
#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl SendAdapter for RecordingSender {
    async fn ack_received(&self, _message_id: &str) -> Result<Option<AckHandle>, ChannelError> {
        Ok(None)
    }

    async fn clear_ack(&self, _ack: &AckHandle) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn send_progress(&self, _chat_id: &str, _text: &str) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn send_reply(&self, reply: &ReplyRequest) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().extend(reply.chunks.iter().cloned());
        Ok(())
    }
}

/// Accepts either a bare message event or a full callback body.
pub fn parse_fixture(raw: &str) -> anyhow::Result<MessageEvent> {
    let value: serde_json::Value = serde_json::from_str(raw).context("fixture is not JSON")?;
    if value.get("header").is_some() {
        let envelope: CallbackEnvelope = serde_json::from_value(value)?;
        let event = envelope
            .event
            .context("callback body has no event")?;
        return Ok(serde_json::from_value(event)?);
    }
    Ok(serde_json::from_value(value)?)
}

pub async fn run_replay(
    config_path: Option<&str>,
    fixture: &str,
    opts: AgentOpts,
) -> anyhow::Result<Vec<String>> {
    let config = load_config(config_path, &opts)?;
    let raw = std::fs::read_to_string(fixture).with_context(|| format!("reading {fixture}"))?;
    let event = parse_fixture(&raw)?;
    replay_event(config, &event, opts.dry_run).await
}

/// Dispatch `event` against a throwaway store and return what would have
/// been sent.
pub async fn replay_event(
    config: RelayConfig,
    event: &MessageEvent,
    dry_run: bool,
) -> anyhow::Result<Vec<String>> {
    let inbound = parse_message_event(event, config.feishu.bot_open_id.as_deref());
    let agent = build_agent(&config, dry_run);
    let store = Arc::new(RelayStore::open_in_memory()?);
    let sender = Arc::new(RecordingSender::default());

    let deps = PipelineDeps::new(Arc::new(config), store, agent, sender.clone());
    let dispatcher = InboundDispatcher::new(deps);
    let outcome = dispatcher.submit(inbound).await?;
    info!(?outcome, "replay finished");

    let sent = std::mem::take(&mut *sender.sent.lock().unwrap());
    Ok(sent)
}

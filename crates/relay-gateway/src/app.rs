use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use relay_agent::{AgentAdapter, CodexAppIndex, CodexRunner, DryRunAgent, ThreadMetadataSync};
use relay_channels::{connect_with_retry, BackoffConfig, InboundSink, InboundTransport};
use relay_core::RelayConfig;
use relay_feishu::{FeishuApi, FeishuSender, WebhookTransport};
use relay_pipeline::{InboundDispatcher, PipelineDeps};
use relay_store::RelayStore;

use crate::AgentOpts;

/// Load config and fold command-line overrides into it.
pub fn load_config(config_path: Option<&str>, opts: &AgentOpts) -> anyhow::Result<RelayConfig> {
    let mut config = RelayConfig::load(config_path).context("loading config")?;
    apply_overrides(&mut config, opts);
    Ok(config)
}

pub fn apply_overrides(config: &mut RelayConfig, opts: &AgentOpts) {
    if let Some(path) = opts
        .codex_path
        .clone()
        .or_else(|| std::env::var("CODEX_PATH").ok())
        .filter(|p| !p.trim().is_empty())
    {
        config.codex.path = path;
    }
    if let Some(id) = opts.bot_open_id.as_ref().filter(|id| !id.is_empty()) {
        config.feishu.bot_open_id = Some(id.clone());
    }
}

pub fn build_agent(config: &RelayConfig, dry_run: bool) -> Arc<dyn AgentAdapter> {
    if dry_run {
        info!("dry-run: codex will not be executed");
        Arc::new(DryRunAgent)
    } else {
        Arc::new(CodexRunner::from_config(&config.codex))
    }
}

/// Remove dedup records past the configured retention.
pub fn prune_processed(store: &RelayStore, config: &RelayConfig) -> anyhow::Result<()> {
    let Some(days) = config.storage.processed_retention_days else {
        return Ok(());
    };
    let cutoff = Utc::now() - Duration::days(i64::from(days));
    let removed = store.prune_processed(cutoff)?;
    info!(removed, retention_days = days, "pruned processed-message records");
    Ok(())
}

/// Normalise session metadata for every thread we already know about.
/// Failures are logged and skipped.
pub fn backfill_session_metadata(store: &RelayStore, metadata: &dyn ThreadMetadataSync) -> usize {
    let sessions = match store.list_sessions() {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "cannot list sessions for metadata backfill");
            return 0;
        }
    };
    let mut updated = 0;
    for thread_id in sessions.iter().filter_map(|s| s.thread_id.as_deref()) {
        match metadata.normalize_session_metadata(thread_id) {
            Ok(true) => updated += 1,
            Ok(false) => {}
            Err(e) => debug!(thread_id, error = %e, "session metadata backfill skipped"),
        }
    }
    updated
}

pub async fn run_service(config_path: Option<&str>, opts: AgentOpts) -> anyhow::Result<()> {
    let config = load_config(config_path, &opts)?;

    let store = Arc::new(
        RelayStore::open(&config.storage.db_path, config.storage.synchronous)
            .with_context(|| format!("opening store at {}", config.storage.db_path))?,
    );
    prune_processed(&store, &config)?;

    let metadata = Arc::new(CodexAppIndex::default_location());
    let backfilled = backfill_session_metadata(&store, metadata.as_ref());
    if backfilled > 0 {
        info!(sessions = backfilled, "session metadata normalised");
    }

    let api = Arc::new(FeishuApi::from_config(&config.feishu)?);
    let sender = Arc::new(FeishuSender::new(api, config.reply.ack_emoji.clone()));
    let agent = build_agent(&config, opts.dry_run);

    let config = Arc::new(config);
    let deps = PipelineDeps::new(Arc::clone(&config), store, agent, sender).with_metadata(metadata);
    let dispatcher: Arc<dyn InboundSink> = Arc::new(InboundDispatcher::new(deps));

    let mut transport = WebhookTransport::new(&config.feishu, dispatcher);
    let backoff = BackoffConfig::from(&config.reconnect);
    connect_with_retry(&mut transport, &backoff, config.reconnect.max_attempts).await?;
    info!(
        transport = transport.name(),
        workspace = %config.routing.default_workspace,
        "relay started"
    );

    shutdown_signal().await;
    info!("shutting down");
    transport.disconnect().await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    use relay_core::SandboxMode;

    #[derive(Default)]
    struct Recorder {
        normalized: Mutex<Vec<String>>,
    }

    impl ThreadMetadataSync for Recorder {
        fn record_thread_title(&self, _thread_id: &str, _title: &str) -> io::Result<bool> {
            Ok(false)
        }

        fn normalize_session_metadata(&self, thread_id: &str) -> io::Result<bool> {
            self.normalized.lock().unwrap().push(thread_id.to_string());
            if thread_id == "t-broken" {
                return Err(io::Error::other("corrupt"));
            }
            Ok(true)
        }
    }

    #[test]
    fn backfill_visits_sessions_with_threads() {
        let store = RelayStore::open_in_memory().unwrap();
        let now = Utc::now();
        store.upsert_session("oc_1", "/w", Some("t-1"), SandboxMode::WorkspaceWrite, now).unwrap();
        store.upsert_session("oc_2", "/w", None, SandboxMode::WorkspaceWrite, now).unwrap();
        store.upsert_session("oc_3", "/w", Some("t-broken"), SandboxMode::WorkspaceWrite, now).unwrap();

        let rec = Recorder::default();
        assert_eq!(backfill_session_metadata(&store, &rec), 1);
        let mut seen = rec.normalized.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["t-1", "t-broken"]);
    }

    #[test]
    fn prune_respects_retention() {
        let store = RelayStore::open_in_memory().unwrap();
        store.mark_processed("om_old", "oc_1", Utc::now() - Duration::days(40)).unwrap();
        store.mark_processed("om_new", "oc_1", Utc::now()).unwrap();

        let mut config = RelayConfig::for_workspace("/w");
        prune_processed(&store, &config).unwrap();
        assert!(store.is_processed("om_old").unwrap());

        config.storage.processed_retention_days = Some(30);
        prune_processed(&store, &config).unwrap();
        assert!(!store.is_processed("om_old").unwrap());
        assert!(store.is_processed("om_new").unwrap());
    }

    #[test]
    fn overrides_replace_config_values() {
        let mut config = RelayConfig::for_workspace("/w");
        apply_overrides(
            &mut config,
            &AgentOpts {
                dry_run: false,
                codex_path: Some("/opt/codex".into()),
                bot_open_id: Some("ou_bot".into()),
            },
        );
        assert_eq!(config.codex.path, "/opt/codex");
        assert_eq!(config.feishu.bot_open_id.as_deref(), Some("ou_bot"));
    }
}

use std::collections::BTreeMap;
use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{RelayError, Result};
use crate::types::{RenderMode, SandboxMode};

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8787";
pub const DEFAULT_EVENT_PATH: &str = "/feishu/events";
pub const DEFAULT_CHUNK_LIMIT: usize = 4000;
pub const DEFAULT_CODEX_TIMEOUT_SECS: u64 = 600; // 10 minutes per agent turn

/// Top-level config (config.toml + RELAY_* / FEISHU_APP_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub feishu: FeishuConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    pub routing: RoutingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub codex: CodexConfig,
    #[serde(default)]
    pub reply: ReplyConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeishuConfig {
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
    /// `feishu`, `lark`, or an explicit `https://` base URL.
    #[serde(default = "default_domain")]
    pub domain: String,
    /// Token Feishu includes in every event callback. Unchecked when unset.
    pub verification_token: Option<String>,
    /// The bot's own open_id; sharpens mention detection in groups.
    pub bot_open_id: Option<String>,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_event_path")]
    pub event_path: String,
}

impl Default for FeishuConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            app_secret: None,
            domain: default_domain(),
            verification_token: None,
            bot_open_id: None,
            listen: default_listen(),
            event_path: default_event_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DmPolicy {
    /// Pairing flow is not implemented yet; gated like `Allowlist`.
    #[default]
    Pairing,
    Allowlist,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupPolicy {
    #[default]
    Allowlist,
    Open,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub dm_policy: DmPolicy,
    #[serde(default)]
    pub group_policy: GroupPolicy,
    #[serde(default = "bool_true")]
    pub require_mention: bool,
    #[serde(default)]
    pub allow_from_user_open_ids: Vec<String>,
    #[serde(default)]
    pub allow_from_group_chat_ids: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            dm_policy: DmPolicy::default(),
            group_policy: GroupPolicy::default(),
            require_mention: true,
            allow_from_user_open_ids: Vec::new(),
            allow_from_group_chat_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub default_workspace: String,
    /// Explicit chat_id → workspace mapping; wins over the default.
    #[serde(default)]
    pub chat_to_workspace: BTreeMap<String, String>,
    /// When empty, only the default and mapped workspaces are allowed.
    #[serde(default)]
    pub workspace_allowlist: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Off,
    #[default]
    Normal,
    Full,
}

impl SyncMode {
    pub fn pragma_value(&self) -> &'static str {
        match self {
            SyncMode::Off => "OFF",
            SyncMode::Normal => "NORMAL",
            SyncMode::Full => "FULL",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub synchronous: SyncMode,
    /// Processed-message records older than this are pruned at startup.
    /// `None` keeps them forever.
    #[serde(default)]
    pub processed_retention_days: Option<u32>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            synchronous: SyncMode::default(),
            processed_retention_days: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodexConfig {
    #[serde(default = "default_codex_path")]
    pub path: String,
    #[serde(default)]
    pub sandbox_default: SandboxMode,
    /// Empty string means "let codex pick".
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_codex_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            path: default_codex_path(),
            sandbox_default: SandboxMode::default(),
            model: String::new(),
            timeout_secs: DEFAULT_CODEX_TIMEOUT_SECS,
            max_concurrency: default_max_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyConfig {
    #[serde(default)]
    pub render_mode: RenderMode,
    #[serde(default = "default_chunk_limit")]
    pub chunk_limit: usize,
    /// Stream agent stage updates into the chat while it works.
    #[serde(default = "bool_true")]
    pub progress: bool,
    #[serde(default = "default_ack_emoji")]
    pub ack_emoji: String,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            render_mode: RenderMode::default(),
            chunk_limit: DEFAULT_CHUNK_LIMIT,
            progress: true,
            ack_emoji: default_ack_emoji(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_cap_ms")]
    pub cap_ms: u64,
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    /// `None` retries forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            cap_ms: default_cap_ms(),
            jitter_ratio: default_jitter_ratio(),
            max_attempts: None,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_domain() -> String {
    "feishu".to_string()
}
fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}
fn default_event_path() -> String {
    DEFAULT_EVENT_PATH.to_string()
}
fn default_codex_path() -> String {
    "codex".to_string()
}
fn default_codex_timeout() -> u64 {
    DEFAULT_CODEX_TIMEOUT_SECS
}
fn default_max_concurrency() -> usize {
    4
}
fn default_chunk_limit() -> usize {
    DEFAULT_CHUNK_LIMIT
}
fn default_ack_emoji() -> String {
    "Typing".to_string()
}
fn default_base_ms() -> u64 {
    1_000
}
fn default_cap_ms() -> u64 {
    30_000
}
fn default_jitter_ratio() -> f64 {
    0.2
}
fn default_db_path() -> String {
    bridge_dir()
        .join("var")
        .join("state.sqlite3")
        .to_string_lossy()
        .to_string()
}

/// `~/.codex`, shared with the codex CLI itself.
pub fn codex_home_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".codex")
}

/// `~/.codex/feishu-bridge`: config and state for this relay.
pub fn bridge_dir() -> PathBuf {
    codex_home_dir().join("feishu-bridge")
}

pub fn default_config_path() -> String {
    bridge_dir()
        .join("config.toml")
        .to_string_lossy()
        .to_string()
}

impl RelayConfig {
    /// Smallest valid config: everything defaulted around one workspace.
    pub fn for_workspace(default_workspace: impl Into<String>) -> Self {
        Self {
            feishu: FeishuConfig::default(),
            policy: PolicyConfig::default(),
            routing: RoutingConfig {
                default_workspace: default_workspace.into(),
                chat_to_workspace: BTreeMap::new(),
                workspace_allowlist: Vec::new(),
            },
            storage: StorageConfig::default(),
            codex: CodexConfig::default(),
            reply: ReplyConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Load config from a TOML file with env overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.codex/feishu-bridge/config.toml
    ///
    /// `RELAY_<SECTION>__<KEY>` overrides any field; `FEISHU_APP_ID` and
    /// `FEISHU_APP_SECRET` override the app credentials so the file can
    /// omit secrets.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        if std::path::Path::new(&path).exists() {
            info!(path = %path, "loading config");
        } else {
            info!(path = %path, "config file not found, using env and defaults");
        }

        let mut config: RelayConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("RELAY_").split("__"))
            .merge(
                Env::raw()
                    .only(&["FEISHU_APP_ID", "FEISHU_APP_SECRET"])
                    .map(|key| key.as_str().replacen("feishu_", "feishu.", 1).into()),
            )
            .extract()
            .map_err(|e| RelayError::Config(e.to_string()))?;

        config.feishu.app_id = non_empty(config.feishu.app_id.take());
        config.feishu.app_secret = non_empty(config.feishu.app_secret.take());
        config.validate()?;
        debug!(
            default_workspace = %config.routing.default_workspace,
            mapped_chats = config.routing.chat_to_workspace.len(),
            has_credentials = config.feishu.app_id.is_some() && config.feishu.app_secret.is_some(),
            "config loaded"
        );
        Ok(config)
    }

    /// Reject values the rest of the system cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.routing.default_workspace.trim().is_empty() {
            return Err(RelayError::Config(
                "routing.default_workspace must not be empty".to_string(),
            ));
        }
        if self.reply.chunk_limit == 0 {
            return Err(RelayError::Config(
                "reply.chunk_limit must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter_ratio) {
            return Err(RelayError::Config(format!(
                "reconnect.jitter_ratio must be within [0, 1], got {}",
                self.reconnect.jitter_ratio
            )));
        }
        if self.codex.max_concurrency == 0 {
            return Err(RelayError::Config(
                "codex.max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RelayConfig::for_workspace("/tmp");
        assert_eq!(cfg.feishu.domain, "feishu");
        assert_eq!(cfg.policy.dm_policy, DmPolicy::Pairing);
        assert_eq!(cfg.policy.group_policy, GroupPolicy::Allowlist);
        assert!(cfg.policy.require_mention);
        assert_eq!(cfg.codex.sandbox_default, SandboxMode::ReadOnly);
        assert_eq!(cfg.reply.chunk_limit, 4000);
        assert!(cfg.storage.db_path.ends_with("state.sqlite3"));
        assert!(cfg.reconnect.max_attempts.is_none());
    }

    #[test]
    fn load_reads_toml_and_fills_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[policy]
dm_policy = "open"
group_policy = "disabled"
allow_from_group_chat_ids = ["oc_1"]

[routing]
default_workspace = "/srv/work"

[routing.chat_to_workspace]
oc_1 = "/srv/other"

[codex]
sandbox_default = "workspace-write"
"#,
        )
        .unwrap();

        let cfg = RelayConfig::load(path.to_str()).expect("load");
        assert_eq!(cfg.policy.dm_policy, DmPolicy::Open);
        assert_eq!(cfg.policy.group_policy, GroupPolicy::Disabled);
        assert_eq!(cfg.routing.chat_to_workspace["oc_1"], "/srv/other");
        assert_eq!(cfg.codex.sandbox_default, SandboxMode::WorkspaceWrite);
        assert_eq!(cfg.reply.render_mode, RenderMode::Auto);
    }

    #[test]
    fn load_without_workspace_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[policy]\nrequire_mention = false\n").unwrap();
        assert!(RelayConfig::load(path.to_str()).is_err());
    }

    #[test]
    fn validate_rejects_zero_chunk_limit() {
        let mut cfg = RelayConfig::for_workspace("/tmp");
        cfg.reply.chunk_limit = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_jitter() {
        let mut cfg = RelayConfig::for_workspace("/tmp");
        cfg.reconnect.jitter_ratio = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn sync_mode_maps_to_pragma() {
        assert_eq!(SyncMode::Full.pragma_value(), "FULL");
        assert_eq!(SyncMode::default().pragma_value(), "NORMAL");
    }
}

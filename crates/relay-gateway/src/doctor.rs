//! Environment checks for `codex-feishu-relay doctor`.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use relay_core::config::{DmPolicy, GroupPolicy};
use relay_core::RelayConfig;
use relay_store::RelayStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Warn => "WARN",
            CheckStatus::Fail => "FAIL",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub id: String,
    pub status: CheckStatus,
    pub message: String,
}

impl CheckResult {
    fn new(id: impl Into<String>, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status,
            message: message.into(),
        }
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.status, self.id, self.message)
    }
}

pub fn exit_code(results: &[CheckResult]) -> i32 {
    if results.iter().any(|r| r.status == CheckStatus::Fail) {
        1
    } else {
        0
    }
}

pub async fn run_doctor(config_path: Option<&str>, codex_path: Option<&str>) -> Vec<CheckResult> {
    let mut results = Vec::new();
    let shown_path = config_path
        .map(String::from)
        .unwrap_or_else(relay_core::config::default_config_path);

    let config = match RelayConfig::load(config_path) {
        Ok(c) => {
            results.push(CheckResult::new("config.parse", CheckStatus::Pass, shown_path));
            c
        }
        Err(e) => {
            results.push(CheckResult::new("config.parse", CheckStatus::Fail, e.to_string()));
            return results;
        }
    };

    results.extend(check_workspace_paths(&config));
    results.push(check_store(&config));
    results.extend(check_policy_hints(&config));

    let codex = codex_path.unwrap_or(&config.codex.path);
    results.extend(check_codex(codex).await);

    if config.feishu.app_id.is_none() || config.feishu.app_secret.is_none() {
        results.push(CheckResult::new(
            "feishu.creds",
            CheckStatus::Warn,
            "missing feishu app_id/app_secret (set in config or env FEISHU_APP_ID/FEISHU_APP_SECRET)",
        ));
    } else {
        results.push(CheckResult::new("feishu.creds", CheckStatus::Pass, "app credentials present"));
    }

    results
}

/// Default and mapped workspaces must be existing directories.
pub fn check_workspace_paths(config: &RelayConfig) -> Vec<CheckResult> {
    let paths: BTreeSet<&str> = std::iter::once(config.routing.default_workspace.as_str())
        .chain(config.routing.chat_to_workspace.values().map(String::as_str))
        .collect();

    paths
        .into_iter()
        .map(|p| {
            let abs = absolute(Path::new(p));
            let id = format!("workspace.exists:{}", abs.display());
            match std::fs::metadata(&abs) {
                Ok(m) if m.is_dir() => CheckResult::new(id, CheckStatus::Pass, abs.display().to_string()),
                Ok(_) => CheckResult::new(id, CheckStatus::Fail, format!("not a directory: {}", abs.display())),
                Err(_) => CheckResult::new(
                    id,
                    CheckStatus::Fail,
                    format!("missing workspace path: {}", abs.display()),
                ),
            }
        })
        .collect()
}

pub fn check_policy_hints(config: &RelayConfig) -> Vec<CheckResult> {
    let policy = &config.policy;
    let mut out = Vec::new();
    if policy.group_policy == GroupPolicy::Allowlist && policy.allow_from_group_chat_ids.is_empty() {
        out.push(CheckResult::new(
            "policy.group_allowlist",
            CheckStatus::Warn,
            "group_policy=allowlist but allow_from_group_chat_ids is empty (no group messages will be handled)",
        ));
    }
    if policy.dm_policy != DmPolicy::Open && policy.allow_from_user_open_ids.is_empty() {
        out.push(CheckResult::new(
            "policy.dm_allowlist",
            CheckStatus::Warn,
            format!(
                "dm_policy={:?} but allow_from_user_open_ids is empty (no DMs will be handled)",
                policy.dm_policy
            )
            .to_lowercase(),
        ));
    }
    out
}

fn check_store(config: &RelayConfig) -> CheckResult {
    match RelayStore::open(&config.storage.db_path, config.storage.synchronous) {
        Ok(_) => CheckResult::new("storage.sqlite", CheckStatus::Pass, config.storage.db_path.clone()),
        Err(e) => CheckResult::new("storage.sqlite", CheckStatus::Fail, e.to_string()),
    }
}

/// Locate the codex binary, then ask it for its version.
async fn check_codex(codex: &str) -> Vec<CheckResult> {
    let resolved = match which::which(codex) {
        Ok(p) => p,
        Err(e) => {
            return vec![CheckResult::new(
                "codex.binary",
                CheckStatus::Fail,
                format!("'{codex}' not found: {e}"),
            )]
        }
    };
    let mut out = vec![CheckResult::new(
        "codex.binary",
        CheckStatus::Pass,
        resolved.display().to_string(),
    )];

    let probe = tokio::process::Command::new(&resolved)
        .arg("--version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();
    out.push(match tokio::time::timeout(Duration::from_secs(10), probe).await {
        Ok(Ok(o)) if o.status.success() => {
            let version = String::from_utf8_lossy(&o.stdout).trim().to_string();
            CheckResult::new(
                "codex.version",
                CheckStatus::Pass,
                if version.is_empty() { "(ok)".to_string() } else { version },
            )
        }
        Ok(Ok(o)) => CheckResult::new(
            "codex.version",
            CheckStatus::Warn,
            format!("codex --version exited with {}", o.status),
        ),
        Ok(Err(e)) => CheckResult::new("codex.version", CheckStatus::Warn, format!("codex --version failed: {e}")),
        Err(_) => CheckResult::new("codex.version", CheckStatus::Warn, "codex --version timed out"),
    });
    out
}

fn absolute(p: &Path) -> PathBuf {
    if p.is_absolute() {
        return p.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(p))
        .unwrap_or_else(|_| p.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_checks() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, "x").unwrap();

        let mut config = RelayConfig::for_workspace(dir.path().to_string_lossy());
        config
            .routing
            .chat_to_workspace
            .insert("oc_1".into(), file.to_string_lossy().to_string());
        config
            .routing
            .chat_to_workspace
            .insert("oc_2".into(), dir.path().join("missing").to_string_lossy().to_string());

        let results = check_workspace_paths(&config);
        assert_eq!(results.len(), 3);
        let status_of = |needle: &str| {
            results
                .iter()
                .find(|r| r.id.ends_with(needle))
                .map(|r| r.status)
        };
        assert_eq!(status_of("f.txt"), Some(CheckStatus::Fail));
        assert_eq!(status_of("missing"), Some(CheckStatus::Fail));
        assert_eq!(exit_code(&results), 1);
    }

    #[test]
    fn empty_allowlists_warn() {
        let config = RelayConfig::for_workspace("/w");
        let hints = check_policy_hints(&config);
        let ids: Vec<_> = hints.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["policy.group_allowlist", "policy.dm_allowlist"]);
        assert!(hints.iter().all(|h| h.status == CheckStatus::Warn));
        assert_eq!(exit_code(&hints), 0);

        let mut open = config.clone();
        open.policy.dm_policy = DmPolicy::Open;
        open.policy.group_policy = GroupPolicy::Open;
        assert!(check_policy_hints(&open).is_empty());
    }

    #[tokio::test]
    async fn missing_codex_binary_fails() {
        let results = check_codex("/nonexistent/codex-binary").await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, CheckStatus::Fail);
    }

    #[test]
    fn result_line_format() {
        let r = CheckResult::new("storage.sqlite", CheckStatus::Pass, "/tmp/db");
        assert_eq!(r.to_string(), "[PASS] storage.sqlite: /tmp/db");
    }
}

//! Best-effort sync of relay threads into the Codex desktop app's on-disk
//! index, so threads started from chat show up there with a readable title.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use relay_core::{ChatKind, InboundMessage};
use serde_json::{Map, Value};
use tracing::debug;

const TITLE_TEXT_MAX: usize = 48;
const DESKTOP_ORIGINATOR: &str = "Codex Desktop";
const DESKTOP_SOURCE: &str = "vscode";

/// Metadata hooks run after a thread is persisted. Both return `Ok(true)`
/// when something was written and `Ok(false)` when there was nothing to do.
pub trait ThreadMetadataSync: Send + Sync {
    fn record_thread_title(&self, thread_id: &str, title: &str) -> io::Result<bool>;
    fn normalize_session_metadata(&self, thread_id: &str) -> io::Result<bool>;
}

/// Title shown for a relay thread, e.g. `Feishu group oc_1: fix the build`.
pub fn format_thread_title(inbound: &InboundMessage) -> String {
    let scope = match inbound.chat_kind {
        ChatKind::Group => format!("Feishu group {}", inbound.chat_id),
        ChatKind::Direct => format!(
            "Feishu DM {}",
            inbound.sender_open_id.as_deref().unwrap_or(&inbound.chat_id)
        ),
    };
    let text = inbound.text.trim();
    if text.is_empty() {
        return scope;
    }
    format!("{scope}: {}", truncate(text, TITLE_TEXT_MAX))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{head}...")
}

/// File-backed index rooted at a Codex home directory (`~/.codex`).
#[derive(Debug, Clone)]
pub struct CodexAppIndex {
    codex_home: PathBuf,
}

impl CodexAppIndex {
    pub fn new(codex_home: impl Into<PathBuf>) -> Self {
        Self {
            codex_home: codex_home.into(),
        }
    }

    pub fn default_location() -> Self {
        Self::new(relay_core::config::codex_home_dir())
    }

    pub fn state_path(&self) -> PathBuf {
        self.codex_home.join(".codex-global-state.json")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.codex_home.join("sessions")
    }

    /// Most recently modified `<thread_id>.jsonl` under the sessions tree.
    fn find_session_file(&self, thread_id: &str) -> Option<PathBuf> {
        let needle = format!("{thread_id}.jsonl");
        let mut files = Vec::new();
        walk_jsonl(&self.sessions_dir(), &mut files);
        files
            .into_iter()
            .filter(|p| p.to_string_lossy().ends_with(&needle))
            .max_by_key(|p| {
                fs::metadata(p)
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH)
            })
    }
}

impl ThreadMetadataSync for CodexAppIndex {
    fn record_thread_title(&self, thread_id: &str, title: &str) -> io::Result<bool> {
        let path = self.state_path();
        // A missing or corrupt state file is replaced with a minimal one.
        let mut state = fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
            .filter(Value::is_object)
            .unwrap_or_else(|| Value::Object(Map::new()));

        let titles = object_entry(object_entry(&mut state, "thread-titles"), "titles");
        let has_title = titles
            .get(thread_id)
            .and_then(Value::as_str)
            .is_some_and(|t| !t.trim().is_empty());
        if has_title {
            return Ok(false);
        }
        if let Value::Object(map) = titles {
            map.insert(thread_id.to_string(), Value::String(title.to_string()));
        }

        let mut body = serde_json::to_string_pretty(&state)?;
        body.push('\n');
        write_atomic(&path, body.as_bytes())?;
        debug!(thread_id, title, "recorded thread title");
        Ok(true)
    }

    fn normalize_session_metadata(&self, thread_id: &str) -> io::Result<bool> {
        let Some(file) = self.find_session_file(thread_id) else {
            return Ok(false);
        };
        let raw = fs::read_to_string(&file)?;
        let (first, rest) = match raw.split_once('\n') {
            Some((first, rest)) => (first, Some(rest)),
            None => (raw.as_str(), None),
        };
        if first.trim().is_empty() {
            return Ok(false);
        }
        let Ok(mut meta) = serde_json::from_str::<Value>(first) else {
            return Ok(false);
        };
        if meta.get("type").and_then(Value::as_str) != Some("session_meta") {
            return Ok(false);
        }
        let Some(payload) = meta.get_mut("payload").and_then(Value::as_object_mut) else {
            return Ok(false);
        };
        let originator_ok =
            payload.get("originator").and_then(Value::as_str) == Some(DESKTOP_ORIGINATOR);
        let source_ok = payload.get("source").and_then(Value::as_str) == Some(DESKTOP_SOURCE);
        if originator_ok && source_ok {
            return Ok(false);
        }
        payload.insert("originator".into(), DESKTOP_ORIGINATOR.into());
        payload.insert("source".into(), DESKTOP_SOURCE.into());

        let mut body = serde_json::to_string(&meta)?;
        if let Some(rest) = rest {
            body.push('\n');
            body.push_str(rest);
        }
        write_atomic(&file, body.as_bytes())?;
        debug!(thread_id, file = %file.display(), "normalized session metadata");
        Ok(true)
    }
}

/// Child object under `key`, replacing any non-object value.
fn object_entry<'a>(value: &'a mut Value, key: &str) -> &'a mut Value {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    let Value::Object(map) = value else {
        unreachable!("value was just made an object")
    };
    let entry = map
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    entry
}

fn walk_jsonl(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        match entry.file_type() {
            Ok(t) if t.is_dir() => walk_jsonl(&path, out),
            Ok(t) if t.is_file() && path.extension().is_some_and(|e| e == "jsonl") => {
                out.push(path)
            }
            _ => {}
        }
    }
}

/// Replace `path` by writing a sibling temp file and renaming it over.
fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_formats() {
        let group = InboundMessage::text("oc_1", ChatKind::Group, "m1", "  fix the build  ");
        assert_eq!(format_thread_title(&group), "Feishu group oc_1: fix the build");

        let dm = InboundMessage::text("oc_2", ChatKind::Direct, "m2", "").with_sender("ou_7");
        assert_eq!(format_thread_title(&dm), "Feishu DM ou_7");

        let long = InboundMessage::text("oc_3", ChatKind::Direct, "m3", "x".repeat(100));
        assert_eq!(
            format_thread_title(&long),
            format!("Feishu DM oc_3: {}...", "x".repeat(45))
        );
    }

    #[test]
    fn title_written_once() {
        let home = tempfile::tempdir().unwrap();
        let index = CodexAppIndex::new(home.path());
        fs::write(index.state_path(), r#"{"other":1,"thread-titles":[]}"#).unwrap();

        assert!(index.record_thread_title("t1", "first").unwrap());
        assert!(!index.record_thread_title("t1", "second").unwrap());

        let state: Value =
            serde_json::from_str(&fs::read_to_string(index.state_path()).unwrap()).unwrap();
        assert_eq!(state["thread-titles"]["titles"]["t1"], "first");
        assert_eq!(state["other"], 1);
    }

    #[test]
    fn title_recovers_from_corrupt_state() {
        let home = tempfile::tempdir().unwrap();
        let index = CodexAppIndex::new(home.path());
        fs::write(index.state_path(), "{not json").unwrap();
        assert!(index.record_thread_title("t1", "title").unwrap());
    }

    #[test]
    fn normalizes_newest_session_file() {
        let home = tempfile::tempdir().unwrap();
        let index = CodexAppIndex::new(home.path());
        let day = index.sessions_dir().join("2025").join("01");
        fs::create_dir_all(&day).unwrap();
        let file = day.join("rollout-abc-t9.jsonl");
        fs::write(
            &file,
            "{\"type\":\"session_meta\",\"payload\":{\"originator\":\"codex_exec\",\"source\":\"exec\"}}\n{\"type\":\"event\"}\n",
        )
        .unwrap();

        assert!(index.normalize_session_metadata("t9").unwrap());
        let raw = fs::read_to_string(&file).unwrap();
        let mut lines = raw.lines();
        let meta: Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(meta["payload"]["originator"], "Codex Desktop");
        assert_eq!(meta["payload"]["source"], "vscode");
        assert_eq!(lines.next(), Some("{\"type\":\"event\"}"));

        assert!(!index.normalize_session_metadata("t9").unwrap());
        assert!(!index.normalize_session_metadata("missing").unwrap());
    }

    #[test]
    fn skips_files_without_session_meta() {
        let home = tempfile::tempdir().unwrap();
        let index = CodexAppIndex::new(home.path());
        fs::create_dir_all(index.sessions_dir()).unwrap();
        fs::write(index.sessions_dir().join("t2.jsonl"), "{\"type\":\"event\"}\n").unwrap();
        assert!(!index.normalize_session_metadata("t2").unwrap());
    }
}

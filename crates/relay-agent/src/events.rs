//! Line-delimited JSON events emitted by `codex exec --json`.
//!
//! Each stdout line is one event discriminated by its `type` field. Lines
//! that are not JSON, or whose shape does not match, are skipped rather than
//! failing the turn.

use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum CodexEvent {
    #[serde(rename = "thread.started")]
    ThreadStarted { thread_id: String },

    #[serde(rename = "turn.started")]
    TurnStarted,

    #[serde(rename = "turn.completed")]
    TurnCompleted,

    #[serde(rename = "turn.failed")]
    TurnFailed {
        #[serde(default)]
        error: Option<serde_json::Value>,
    },

    #[serde(rename = "item.started")]
    ItemStarted { item: EventItem },

    #[serde(rename = "item.completed")]
    ItemCompleted { item: EventItem },

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: Option<String>,
    },

    #[serde(other)]
    Unknown,
}

/// Payload of `item.*` events. Agents disagree on field names, so the kind
/// and the tool name are looked up under several aliases.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EventItem {
    #[serde(rename = "type", alias = "item_type", alias = "kind", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool: Option<NamedRef>,
    #[serde(default)]
    pub call: Option<NamedRef>,
    #[serde(default)]
    pub function: Option<NamedRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NamedRef {
    #[serde(default)]
    pub name: Option<String>,
}

impl EventItem {
    /// Lowercased item kind (`agent_message`, `tool_call`, …).
    pub fn kind(&self) -> Option<String> {
        self.kind
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_lowercase)
    }

    pub fn is_agent_message(&self) -> bool {
        self.kind().as_deref() == Some("agent_message")
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(
            self.kind().as_deref(),
            Some("tool_call" | "tool_use" | "function_call")
        )
    }

    /// First non-blank tool name among the known aliases.
    pub fn tool_name(&self) -> Option<&str> {
        [
            self.tool_name.as_deref(),
            self.name.as_deref(),
            self.tool.as_ref().and_then(|t| t.name.as_deref()),
            self.call.as_ref().and_then(|c| c.name.as_deref()),
            self.function.as_ref().and_then(|f| f.name.as_deref()),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|n| !n.is_empty())
    }
}

/// Parse one stdout line. `None` for blank or unparseable lines.
pub fn parse_line(line: &str) -> Option<CodexEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(error = %e, "skipping unparseable agent output line");
            None
        }
    }
}

/// What a finished turn reported: the thread to resume next time and the
/// last agent message. Later events overwrite earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnOutput {
    pub thread_id: Option<String>,
    pub final_text: Option<String>,
}

impl TurnOutput {
    pub fn observe(&mut self, event: &CodexEvent) {
        match event {
            CodexEvent::ThreadStarted { thread_id } => {
                self.thread_id = Some(thread_id.clone());
            }
            CodexEvent::ItemCompleted { item } if item.is_agent_message() => {
                if let Some(text) = &item.text {
                    self.final_text = Some(text.clone());
                }
            }
            _ => {}
        }
    }

    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut out = Self::default();
        for event in lines.into_iter().filter_map(parse_line) {
            out.observe(&event);
        }
        out
    }
}

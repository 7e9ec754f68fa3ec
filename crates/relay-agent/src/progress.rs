use crate::events::{CodexEvent, EventItem};

const TOOL_NAME_MAX: usize = 40;

/// Human-readable stage for an agent event, if the event marks one.
pub fn stage_text(event: &CodexEvent) -> Option<String> {
    match event {
        CodexEvent::ThreadStarted { .. } => Some("Session established".to_string()),
        CodexEvent::TurnStarted => Some("Analyzing request".to_string()),
        CodexEvent::TurnCompleted => Some("Finalizing output".to_string()),
        CodexEvent::ItemStarted { item } => started(item),
        CodexEvent::ItemCompleted { item } => completed(item),
        _ => None,
    }
}

fn started(item: &EventItem) -> Option<String> {
    if item.is_tool_call() {
        return Some(with_tool("Running tool", item));
    }
    match item.kind().as_deref() {
        Some("agent_message") => Some("Drafting response".to_string()),
        Some("reasoning" | "analysis") => Some("Planning next steps".to_string()),
        _ => None,
    }
}

fn completed(item: &EventItem) -> Option<String> {
    if item.is_tool_call() {
        return Some(with_tool("Tool finished", item));
    }
    if item.is_agent_message() {
        return Some("Response draft ready".to_string());
    }
    None
}

fn with_tool(label: &str, item: &EventItem) -> String {
    match item.tool_name() {
        Some(name) => format!("{label}: {}", truncate(name, TOOL_NAME_MAX)),
        None => label.to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{head}...")
}

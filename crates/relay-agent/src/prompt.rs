use relay_core::{ChatKind, InboundMessage};

/// Single-line prompt handed to the agent: `[<scope>] <speaker>: <text>`.
pub fn build_prompt(inbound: &InboundMessage) -> String {
    let speaker = inbound
        .sender_name
        .as_deref()
        .or(inbound.sender_open_id.as_deref())
        .or(inbound.sender_user_id.as_deref())
        .unwrap_or("user");
    let scope = match inbound.chat_kind {
        ChatKind::Group => format!("Feishu group {}", inbound.chat_id),
        ChatKind::Direct => "Feishu DM".to_string(),
    };
    format!("[{scope}] {speaker}: {}", inbound.text)
        .trim()
        .to_string()
}

use serde_json::Value;

use relay_core::{ChatKind, InboundMessage};

use crate::types::{MessageEvent, Mention};

/// Normalize a `im.message.receive_v1` event.
///
/// `bot_open_id` decides which mention counts as addressing the bot; without
/// it any mention does.
pub fn parse_message_event(event: &MessageEvent, bot_open_id: Option<&str>) -> InboundMessage {
    let msg = &event.message;
    let text = extract_text(&msg.content, &msg.message_type);

    InboundMessage {
        chat_id: msg.chat_id.clone(),
        chat_kind: if msg.chat_type == "p2p" {
            ChatKind::Direct
        } else {
            ChatKind::Group
        },
        message_id: msg.message_id.clone(),
        sender_open_id: event.sender.sender_id.open_id.clone(),
        sender_user_id: event.sender.sender_id.user_id.clone(),
        sender_name: None,
        message_type: msg.message_type.clone(),
        raw_content: msg.content.clone(),
        text: strip_mentions(&text, &msg.mentions),
        mentioned_bot: mentions_bot(&msg.mentions, bot_open_id),
        reply_to_message_id: msg.parent_id.clone(),
    }
}

/// Plain text of a message body. Unsupported types and invalid JSON fall
/// back to the raw content.
fn extract_text(raw: &str, message_type: &str) -> String {
    let Ok(parsed) = serde_json::from_str::<Value>(raw) else {
        return raw.to_string();
    };
    match message_type {
        "text" => parsed
            .get("text")
            .map(value_text)
            .unwrap_or_default()
            .trim()
            .to_string(),
        "post" => post_text(&parsed),
        _ => raw.to_string(),
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Flatten a rich-text post: title, then one line per paragraph.
fn post_text(post: &Value) -> String {
    let mut out = String::new();
    if let Some(title) = post.get("title").and_then(Value::as_str) {
        if !title.is_empty() {
            out.push_str(title);
            out.push_str("\n\n");
        }
    }

    let paragraphs = post.get("content").and_then(Value::as_array);
    for paragraph in paragraphs.into_iter().flatten() {
        let Some(elements) = paragraph.as_array() else {
            continue;
        };
        for el in elements.iter().filter(|e| e.is_object()) {
            let field = |name: &str| el.get(name).filter(|v| !v.is_null()).map(value_text);
            match el.get("tag").and_then(Value::as_str) {
                Some("text") => out.push_str(&field("text").unwrap_or_default()),
                Some("a") => out.push_str(&field("text").or_else(|| field("href")).unwrap_or_default()),
                Some("at") => {
                    out.push('@');
                    out.push_str(&field("user_name").or_else(|| field("user_id")).unwrap_or_default());
                }
                Some("img") => out.push_str("[image]"),
                _ => {}
            }
        }
        out.push('\n');
    }

    let out = out.trim();
    if out.is_empty() {
        "[rich post]".to_string()
    } else {
        out.to_string()
    }
}

fn mentions_bot(mentions: &[Mention], bot_open_id: Option<&str>) -> bool {
    if mentions.is_empty() {
        return false;
    }
    match bot_open_id {
        None => true,
        Some(bot) => mentions
            .iter()
            .any(|m| m.id.open_id.as_deref() == Some(bot)),
    }
}

/// Remove `@name` (plus trailing whitespace) and placeholder keys.
fn strip_mentions(text: &str, mentions: &[Mention]) -> String {
    let mut out = text.to_string();
    for m in mentions {
        if !m.name.is_empty() {
            out = remove_with_trailing_ws(&out, &format!("@{}", m.name))
                .trim()
                .to_string();
        }
        if !m.key.is_empty() {
            out = out.replace(&m.key, "").trim().to_string();
        }
    }
    out.trim().to_string()
}

fn remove_with_trailing_ws(text: &str, needle: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = rest.find(needle) {
        out.push_str(&rest[..at]);
        rest = rest[at + needle.len()..].trim_start();
    }
    out.push_str(rest);
    out
}

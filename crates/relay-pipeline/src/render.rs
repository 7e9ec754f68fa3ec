//! Reply rendering: picks raw vs card and cuts agent output into chunks that
//! fit the platform's message limit without tearing code fences apart.
//!
//! All lengths are counted in `char`s, so chunks always split on character
//! boundaries.

use relay_core::{RenderMode, ReplyMode};

const FENCE: &str = "```";
const BLOCK_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReply {
    pub mode: ReplyMode,
    pub chunks: Vec<String>,
}

/// True when `text` holds a fenced code block or a markdown table.
pub fn should_use_card(text: &str) -> bool {
    has_fence_pair(text) || has_table(text)
}

fn has_fence_pair(text: &str) -> bool {
    text.find(FENCE)
        .is_some_and(|start| text[start + FENCE.len()..].contains(FENCE))
}

/// A `|…|` row line directly followed (blank lines allowed) by a separator
/// line such as `|---|:-:|`.
fn has_table(text: &str) -> bool {
    let lines: Vec<&str> = text.split('\n').map(|l| l.trim_end_matches('\r')).collect();
    lines.iter().enumerate().any(|(i, line)| {
        is_table_row(line)
            && lines[i + 1..]
                .iter()
                .find(|l| !l.is_empty())
                .is_some_and(|next| is_separator_row(next))
    })
}

fn is_table_row(line: &str) -> bool {
    line.ends_with('|') && line.find('|').is_some_and(|first| first + 2 < line.len())
}

fn is_separator_row(line: &str) -> bool {
    if !line.starts_with('|') {
        return false;
    }
    let run: Vec<char> = line
        .chars()
        .take_while(|c| matches!(c, '-' | ':' | '|' | ' '))
        .collect();
    run.iter().skip(2).any(|&c| c == '|')
}

enum Block<'a> {
    Text(Vec<&'a str>),
    Code { info: &'a str, lines: Vec<&'a str> },
}

impl Block<'_> {
    fn to_text(&self) -> String {
        match self {
            Block::Text(lines) => lines.join("\n").trim_end().to_string(),
            Block::Code { info, lines } => code_chunk(&fence_header(info), lines),
        }
    }
}

fn fence_header(info: &str) -> String {
    format!("{FENCE}{info}").trim_end().to_string()
}

fn code_chunk(header: &str, lines: &[&str]) -> String {
    let mut parts = Vec::with_capacity(lines.len() + 2);
    parts.push(header);
    parts.extend_from_slice(lines);
    parts.push(FENCE);
    parts.join("\n").trim_end().to_string()
}

/// Split on lines that open with a fence. An unterminated fence runs to the
/// end of the input.
fn parse_blocks(text: &str) -> Vec<Block<'_>> {
    let mut blocks = Vec::new();
    let mut current_text = Vec::new();
    let mut lines = text.split('\n');

    while let Some(line) = lines.next() {
        let Some(info) = line.strip_prefix(FENCE) else {
            current_text.push(line);
            continue;
        };
        if !current_text.is_empty() {
            blocks.push(Block::Text(std::mem::take(&mut current_text)));
        }
        let mut code = Vec::new();
        for inner in lines.by_ref() {
            if inner.starts_with(FENCE) {
                break;
            }
            code.push(inner);
        }
        blocks.push(Block::Code { info, lines: code });
    }
    if !current_text.is_empty() {
        blocks.push(Block::Text(current_text));
    }
    blocks
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Cut `s` into pieces of at most `limit` chars.
fn hard_split(s: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    chars
        .chunks(limit.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

fn split_text_block(lines: &[&str], limit: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for line in lines {
        let next_len = if current.is_empty() {
            char_len(line)
        } else {
            char_len(&current) + 1 + char_len(line)
        };
        if next_len <= limit {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
            continue;
        }
        if !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
        if char_len(line) > limit {
            out.extend(hard_split(line, limit));
        } else {
            current = line.to_string();
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out.into_iter()
        .map(|s| s.trim_end().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Re-wrap an oversize code block so every piece carries the fence header
/// and footer. Lines longer than the body budget are hard-split first.
fn split_code_block(info: &str, lines: &[&str], limit: usize) -> Vec<String> {
    let header = fence_header(info);
    let overhead = char_len(&header) + 1 + FENCE.len();
    let body_limit = limit.saturating_sub(overhead).saturating_sub(2).max(1);

    let pieces: Vec<String> = lines
        .iter()
        .flat_map(|line| {
            if char_len(line) > body_limit {
                hard_split(line, body_limit)
            } else {
                vec![line.to_string()]
            }
        })
        .collect();

    let mut parts = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0;
    for piece in &pieces {
        let add = usize::from(!current.is_empty()) + char_len(piece);
        if current.is_empty() || current_len + add <= body_limit {
            current.push(piece);
            current_len += add;
            continue;
        }
        parts.push(code_chunk(&header, &current));
        current = vec![piece.as_str()];
        current_len = char_len(piece);
    }
    if !current.is_empty() || parts.is_empty() {
        parts.push(code_chunk(&header, &current));
    }
    parts
}

/// Render `text` for delivery: resolve the mode, then cut into chunks of at
/// most `limit` chars (a zero limit is treated as 1). Chunks keep source
/// order and are never empty.
pub fn render(text: &str, mode: RenderMode, limit: usize) -> RenderedReply {
    let mode = match mode {
        RenderMode::Raw => ReplyMode::Raw,
        RenderMode::Card => ReplyMode::Card,
        RenderMode::Auto if should_use_card(text) => ReplyMode::Card,
        RenderMode::Auto => ReplyMode::Raw,
    };
    let limit = limit.max(1);

    let normalized = text.replace("\r\n", "\n");
    let mut pieces = Vec::new();
    for block in parse_blocks(&normalized) {
        let rendered = block.to_text();
        if rendered.is_empty() {
            continue;
        }
        if char_len(&rendered) <= limit {
            pieces.push(rendered);
            continue;
        }
        match &block {
            Block::Text(lines) => pieces.extend(split_text_block(lines, limit)),
            Block::Code { info, lines } => pieces.extend(split_code_block(info, lines, limit)),
        }
    }

    RenderedReply {
        mode,
        chunks: pack(pieces, limit),
    }
}

/// Greedily join pieces with a blank line between them.
fn pack(pieces: Vec<String>, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        let next_len = if current.is_empty() {
            char_len(&piece)
        } else {
            char_len(&current) + BLOCK_SEPARATOR.len() + char_len(&piece)
        };
        if next_len <= limit {
            if !current.is_empty() {
                current.push_str(BLOCK_SEPARATOR);
            }
            current.push_str(&piece);
            continue;
        }
        if !current.is_empty() {
            chunks.push(current.trim_end().to_string());
            current.clear();
        }
        if char_len(&piece) > limit {
            // Last resort: only reachable when the fence itself exceeds the limit.
            let mut split = hard_split(&piece, limit);
            current = split.pop().unwrap_or_default();
            chunks.extend(split);
        } else {
            current = piece;
        }
    }
    if !current.is_empty() {
        chunks.push(current.trim_end().to_string());
    }
    chunks.retain(|c| !c.is_empty());
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(text: &str, limit: usize) -> Vec<String> {
        render(text, RenderMode::Raw, limit).chunks
    }

    #[test]
    fn auto_selects_card_for_fences() {
        assert!(should_use_card("```js\nx\n```"));
        assert_eq!(render("```js\nx\n```", RenderMode::Auto, 4000).mode, ReplyMode::Card);
        assert!(!should_use_card("one ``` only"));
        assert_eq!(render("plain words", RenderMode::Auto, 4000).mode, ReplyMode::Raw);
    }

    #[test]
    fn auto_selects_card_for_tables() {
        assert!(should_use_card("| a | b |\n|---|:-:|\n| 1 | 2 |"));
        assert!(should_use_card("intro\n| a | b |\r\n\r\n| --- | --- |"));
        assert!(!should_use_card("| a | b |\nno separator"));
        assert!(!should_use_card("a | b\n|---|"));
    }

    #[test]
    fn explicit_mode_wins() {
        assert_eq!(render("```\nx\n```", RenderMode::Raw, 100).mode, ReplyMode::Raw);
        assert_eq!(render("plain", RenderMode::Card, 100).mode, ReplyMode::Card);
    }

    #[test]
    fn chunks_long_text_under_limit() {
        let text = vec!["line"; 100].join("\n");
        let chunks = raw(&text, 50);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| char_len(c) <= 50));
    }

    #[test]
    fn keeps_small_code_block_intact() {
        let text = ["before", "```", "a", "b", "```", "after"].join("\n");
        let chunks = raw(&text, 1000);
        assert_eq!(chunks, vec!["before\n\n```\na\nb\n```\n\nafter"]);
    }

    #[test]
    fn splits_oversize_code_block_keeping_fences() {
        let body: Vec<String> = (0..200).map(|i| format!("L{i}")).collect();
        let text = format!("```rust\n{}\n```", body.join("\n"));
        let chunks = raw(&text, 200);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.starts_with("```rust\n"), "{chunk}");
            assert!(chunk.ends_with("\n```"), "{chunk}");
            assert!(char_len(chunk) <= 200);
        }
        let rejoined: Vec<&str> = chunks
            .iter()
            .flat_map(|c| c.lines().filter(|l| !l.starts_with(FENCE)))
            .collect();
        assert_eq!(rejoined, body.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn long_code_line_is_split_inside_fences() {
        let text = format!("```\n{}\n```", "x".repeat(120));
        let chunks = raw(&text, 40);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.starts_with("```\n") && chunk.ends_with("\n```"));
            assert!(char_len(chunk) <= 40);
        }
    }

    #[test]
    fn unterminated_fence_runs_to_end() {
        let chunks = raw("intro\n```py\nprint(1)\nprint(2)", 1000);
        assert_eq!(chunks, vec!["intro\n\n```py\nprint(1)\nprint(2)\n```"]);
    }

    #[test]
    fn reassembles_without_oversize_lines() {
        let text = "para one\n\npara two\n\npara three";
        let chunks = raw(text, 12);
        assert!(chunks.iter().all(|c| char_len(c) <= 12));
        assert_eq!(chunks.join(BLOCK_SEPARATOR), text);
    }

    #[test]
    fn hard_splits_long_lines_on_char_boundaries() {
        let text = "é".repeat(25);
        let chunks = raw(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| char_len(c) <= 10));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn normalizes_crlf_and_drops_empty() {
        assert!(raw("", 100).is_empty());
        assert!(raw("   \n\n", 100).is_empty());
        assert_eq!(raw("a\r\nb", 100), vec!["a\nb"]);
    }

    #[test]
    fn zero_limit_is_treated_as_one() {
        let chunks = raw("abc", 0);
        assert_eq!(chunks, vec!["a", "b", "c"]);
    }
}

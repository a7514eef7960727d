//! Build chat-ready message parts from a transcript event body.
//!
//! Long text paginates with `[i/N]` markers, expandable quotes stay
//! atomic within one part, user turns get the 👤 prefix, and thinking
//! blocks collapse into their quote.

use muxbot_transcript::{ContentType, Role, EXPANDABLE_QUOTE_END, EXPANDABLE_QUOTE_START};

/// Per-part budget, below the merge cap so a paginated part can still
/// absorb the markdown conversion overhead.
const PART_MAX: usize = 3_500;
/// User turns are context, not content — truncated hard.
const USER_TEXT_MAX: usize = 3_000;
/// Thinking bodies collapse; only the head is worth carrying.
const THINKING_MAX: usize = 1_000;

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('…');
    out
}

/// Split `text` into atomic segments: expandable quotes stay whole.
fn atomic_segments(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(EXPANDABLE_QUOTE_START) {
        if start > 0 {
            segments.push(rest[..start].to_string());
        }
        let tail = &rest[start..];
        let end = tail
            .find(EXPANDABLE_QUOTE_END)
            .map(|e| e + EXPANDABLE_QUOTE_END.len())
            .unwrap_or(tail.len());
        segments.push(tail[..end].to_string());
        rest = &tail[end..];
    }
    if !rest.is_empty() {
        segments.push(rest.to_string());
    }
    segments
}

fn paginate(text: &str) -> Vec<String> {
    if text.chars().count() <= PART_MAX {
        return vec![text.to_string()];
    }

    let mut pages: Vec<String> = Vec::new();
    let mut current = String::new();
    for segment in atomic_segments(text) {
        let is_quote = segment.starts_with(EXPANDABLE_QUOTE_START);
        let pieces: Vec<String> = if is_quote {
            vec![segment]
        } else {
            // Split plain text on line boundaries, hard-splitting any
            // single line that alone exceeds the budget.
            let mut pieces = Vec::new();
            let mut piece = String::new();
            for line in segment.split('\n') {
                if !piece.is_empty() && piece.chars().count() + line.chars().count() + 1 > PART_MAX
                {
                    pieces.push(std::mem::take(&mut piece));
                }
                if line.chars().count() > PART_MAX {
                    if !piece.is_empty() {
                        pieces.push(std::mem::take(&mut piece));
                    }
                    let chars: Vec<char> = line.chars().collect();
                    for chunk in chars.chunks(PART_MAX) {
                        pieces.push(chunk.iter().collect());
                    }
                    continue;
                }
                if !piece.is_empty() {
                    piece.push('\n');
                }
                piece.push_str(line);
            }
            if !piece.is_empty() {
                pieces.push(piece);
            }
            pieces
        };

        for piece in pieces {
            if !current.is_empty()
                && current.chars().count() + piece.chars().count() > PART_MAX
            {
                pages.push(std::mem::take(&mut current));
            }
            current.push_str(&piece);
        }
    }
    if !current.is_empty() {
        pages.push(current);
    }

    // Oversized atomic pieces (a single huge line or quote) are truncated
    // rather than split mid-quote.
    let total = pages.len();
    pages
        .into_iter()
        .enumerate()
        .map(|(i, page)| {
            let page = truncate_chars(&page, PART_MAX);
            if total > 1 {
                format!("[{}/{}]\n{}", i + 1, total, page)
            } else {
                page
            }
        })
        .collect()
}

/// Convert an event body into ordered message parts.
pub fn build_response_parts(text: &str, content_type: ContentType, role: Role) -> Vec<String> {
    if role == Role::User && content_type == ContentType::Text {
        return vec![format!("👤 {}", truncate_chars(text, USER_TEXT_MAX))];
    }

    match content_type {
        ContentType::Thinking => {
            let body = text
                .strip_prefix(EXPANDABLE_QUOTE_START)
                .and_then(|t| t.strip_suffix(EXPANDABLE_QUOTE_END))
                .unwrap_or(text);
            vec![format!(
                "∴ Thinking…\n{EXPANDABLE_QUOTE_START}{}{EXPANDABLE_QUOTE_END}",
                truncate_chars(body, THINKING_MAX)
            )]
        }
        _ => paginate(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_single_part() {
        let parts = build_response_parts("Hello world", ContentType::Text, Role::Assistant);
        assert_eq!(parts, vec!["Hello world"]);
    }

    #[test]
    fn long_text_paginated_with_markers() {
        let text = "A".repeat(5_000);
        let parts = build_response_parts(&text, ContentType::Text, Role::Assistant);
        assert!(parts.len() > 1);
        assert!(parts[0].starts_with("[1/"));
    }

    #[test]
    fn user_message_prefixed_and_truncated() {
        let parts = build_response_parts("hello", ContentType::Text, Role::User);
        assert_eq!(parts.len(), 1);
        assert!(parts[0].starts_with("👤 "));

        let long = "x".repeat(5_000);
        let parts = build_response_parts(&long, ContentType::Text, Role::User);
        assert_eq!(parts.len(), 1);
        assert!(parts[0].chars().count() < 3_100);
    }

    #[test]
    fn thinking_prefix_and_truncation() {
        let body = format!(
            "{EXPANDABLE_QUOTE_START}{}{EXPANDABLE_QUOTE_END}",
            "x".repeat(2_000)
        );
        let parts = build_response_parts(&body, ContentType::Thinking, Role::Assistant);
        assert_eq!(parts.len(), 1);
        assert!(parts[0].contains("Thinking"));
        assert!(parts[0].chars().count() < 1_200);
    }

    #[test]
    fn expandable_quote_stays_atomic() {
        let text = format!(
            "Some text\n{EXPANDABLE_QUOTE_START}quoted content here{EXPANDABLE_QUOTE_END}"
        );
        let parts = build_response_parts(&text, ContentType::Text, Role::Assistant);
        assert_eq!(parts.len(), 1);
        assert!(parts[0].contains("quoted content here"));
    }

    #[test]
    fn quote_never_split_across_pages() {
        let long_quote = format!(
            "{EXPANDABLE_QUOTE_START}{}{EXPANDABLE_QUOTE_END}",
            "q".repeat(1_000)
        );
        let text = format!("{}\n{long_quote}", "A".repeat(3_400));
        let parts = build_response_parts(&text, ContentType::Text, Role::Assistant);
        // The quote landed on its own page, markers intact.
        let quote_part = parts
            .iter()
            .find(|p| p.contains(EXPANDABLE_QUOTE_START))
            .unwrap();
        assert!(quote_part.contains(EXPANDABLE_QUOTE_END));
    }
}

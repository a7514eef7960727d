//! Minimal markdown → Telegram MarkdownV2 conversion.
//!
//! Handles the three constructs the transcript pipeline produces: `**…**`
//! bold, `` `…` `` inline code, and the expandable-quote sentinels (which
//! become Telegram's collapsible blockquote). Everything else is escaped.
//! When Telegram rejects the result anyway, senders fall back to plain
//! text — this converter only has to be right for the common case.

use muxbot_transcript::{EXPANDABLE_QUOTE_END, EXPANDABLE_QUOTE_START};

/// Escape all MarkdownV2 special characters.
pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for ch in text.chars() {
        match ch {
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '='
            | '|' | '{' | '}' | '.' | '!' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Escape within an inline-code span (only `\` and `` ` `` are special).
fn escape_code(text: &str) -> String {
    text.replace('\\', "\\\\").replace('`', "\\`")
}

/// Convert `**bold**` and `` `code` `` spans, escaping the rest.
fn convert_inline(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut rest = text;

    loop {
        let bold = rest.find("**");
        let code = rest.find('`');
        match (bold, code) {
            (None, None) => {
                out.push_str(&escape_markdown_v2(rest));
                return out;
            }
            (Some(b), c) if c.map_or(true, |c| b < c) => {
                if let Some(end) = rest[b + 2..].find("**") {
                    out.push_str(&escape_markdown_v2(&rest[..b]));
                    out.push('*');
                    out.push_str(&escape_markdown_v2(&rest[b + 2..b + 2 + end]));
                    out.push('*');
                    rest = &rest[b + 2 + end + 2..];
                } else {
                    out.push_str(&escape_markdown_v2(rest));
                    return out;
                }
            }
            (_, Some(c)) => {
                if let Some(end) = rest[c + 1..].find('`') {
                    out.push_str(&escape_markdown_v2(&rest[..c]));
                    out.push('`');
                    out.push_str(&escape_code(&rest[c + 1..c + 1 + end]));
                    out.push('`');
                    rest = &rest[c + 1 + end + 1..];
                } else {
                    out.push_str(&escape_markdown_v2(rest));
                    return out;
                }
            }
            // (Some, None) always satisfies the guard above.
            _ => unreachable!(),
        }
    }
}

/// Render one expandable-quote body as a collapsible blockquote.
fn render_expandable(body: &str) -> String {
    let lines: Vec<&str> = body.split('\n').collect();
    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            out.push_str("**>");
        } else {
            out.push('\n');
            out.push('>');
        }
        out.push_str(&escape_markdown_v2(line));
    }
    out.push_str("||");
    out
}

/// Convert transcript-formatted text to MarkdownV2.
pub fn convert_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 32);
    let mut rest = text;

    while let Some(start) = rest.find(EXPANDABLE_QUOTE_START) {
        out.push_str(&convert_inline(&rest[..start]));
        let after = &rest[start + EXPANDABLE_QUOTE_START.len()..];
        match after.find(EXPANDABLE_QUOTE_END) {
            Some(end) => {
                out.push_str(&render_expandable(&after[..end]));
                rest = &after[end + EXPANDABLE_QUOTE_END.len()..];
            }
            None => {
                // Unterminated sentinel: render what we have as a quote.
                out.push_str(&render_expandable(after));
                rest = "";
            }
        }
    }
    out.push_str(&convert_inline(rest));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxbot_transcript::EXPANDABLE_QUOTE_END as END;
    use muxbot_transcript::EXPANDABLE_QUOTE_START as START;

    #[test]
    fn escapes_specials() {
        let escaped = escape_markdown_v2("Hello. World! (test) [link] ~strike~");
        assert!(escaped.contains("\\."));
        assert!(escaped.contains("\\!"));
        assert!(escaped.contains("\\("));
        assert!(escaped.contains("\\["));
        assert!(escaped.contains("\\~"));
    }

    #[test]
    fn leaves_normal_chars() {
        assert_eq!(escape_markdown_v2("Hello world 123 abc"), "Hello world 123 abc");
    }

    #[test]
    fn bold_converted() {
        assert_eq!(convert_markdown("**Read**(x)"), "*Read*\\(x\\)");
    }

    #[test]
    fn inline_code_preserved() {
        assert_eq!(convert_markdown("run `ls -la` now"), "run `ls -la` now");
    }

    #[test]
    fn unmatched_bold_escaped() {
        assert_eq!(convert_markdown("a ** b"), "a \\*\\* b");
    }

    #[test]
    fn expandable_quote_rendered() {
        let text = format!("Output:\n{START}line1\nline2{END}");
        let converted = convert_markdown(&text);
        assert!(converted.contains("**>line1"));
        assert!(converted.contains("\n>line2"));
        assert!(converted.ends_with("||"));
        assert!(!converted.contains(START));
    }

    #[test]
    fn unterminated_quote_still_renders() {
        let text = format!("{START}dangling");
        let converted = convert_markdown(&text);
        assert!(converted.contains("**>dangling"));
        assert!(converted.ends_with("||"));
    }

    #[test]
    fn text_after_quote_survives() {
        let text = format!("before {START}q{END} after.");
        let converted = convert_markdown(&text);
        assert!(converted.starts_with("before "));
        assert!(converted.ends_with(" after\\."));
    }
}

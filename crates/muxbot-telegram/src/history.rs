//! Paginated message history for a bound topic.
//!
//! The initial `/history` view pins the transcript byte range, so paging
//! backwards stays stable while new messages keep arriving; the range
//! travels inside the pagination callbacks.

use std::sync::Arc;

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use muxbot_transcript::{ContentType, ParsedEvent, Role};

use crate::callback::CallbackAction;
use crate::state::Shared;

pub const MESSAGES_PER_PAGE: usize = 10;
/// Per-message clip in the history view.
const HISTORY_SNIPPET_MAX: usize = 300;

#[derive(Debug, Clone)]
pub struct HistoryView {
    pub text: String,
    pub keyboard: Option<InlineKeyboardMarkup>,
}

fn icon(event: &ParsedEvent) -> &'static str {
    match (event.role, event.content_type) {
        (Role::User, _) => "👤",
        (_, ContentType::Thinking) => "∴",
        (_, ContentType::ToolUse) => "🔧",
        (_, ContentType::ToolResult) => "↩",
        (_, ContentType::LocalCommand) => "⚡",
        _ => "🤖",
    }
}

fn snippet(text: &str) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= HISTORY_SNIPPET_MAX {
        return flat;
    }
    let mut out: String = flat.chars().take(HISTORY_SNIPPET_MAX).collect();
    out.push('…');
    out
}

/// Render one history page. Page 0 is the newest slice; higher pages go
/// further back. Returns `None` when the window has no session.
pub async fn build_history_view(
    shared: &Arc<Shared>,
    window_name: &str,
    page: usize,
    start_byte: u64,
    end_byte: u64,
) -> Option<HistoryView> {
    let events = shared
        .store
        .recent_messages(window_name, start_byte, Some(end_byte))
        .await;
    if events.is_empty() {
        return Some(HistoryView {
            text: format!("📜 {window_name}\n\n(no messages)"),
            keyboard: None,
        });
    }

    let total_pages = events.len().div_ceil(MESSAGES_PER_PAGE).max(1);
    let page = page.min(total_pages - 1);

    // Page 0 = newest messages, at the end of the list.
    let end = events.len() - page * MESSAGES_PER_PAGE;
    let start = end.saturating_sub(MESSAGES_PER_PAGE);
    let slice = &events[start..end];

    let mut lines = Vec::with_capacity(slice.len());
    for event in slice {
        lines.push(format!("{} {}", icon(event), snippet(&event.text)));
    }

    let text = format!(
        "📜 {window_name} [{}/{}]\n\n{}",
        page + 1,
        total_pages,
        lines.join("\n\n")
    );

    let mut nav: Vec<InlineKeyboardButton> = Vec::new();
    if page + 1 < total_pages {
        nav.push(InlineKeyboardButton::callback(
            "◀ Older",
            CallbackAction::HistoryPage {
                newer: false,
                page: page + 1,
                window: window_name.to_string(),
                start_byte,
                end_byte,
            }
            .encode(),
        ));
    }
    if page > 0 {
        nav.push(InlineKeyboardButton::callback(
            "Newer ▶",
            CallbackAction::HistoryPage {
                newer: true,
                page: page - 1,
                window: window_name.to_string(),
                start_byte,
                end_byte,
            }
            .encode(),
        ));
    }

    let keyboard = if nav.is_empty() {
        None
    } else {
        Some(InlineKeyboardMarkup::new(vec![nav]))
    };

    Some(HistoryView { text, keyboard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_clips_and_flattens() {
        assert_eq!(snippet("a\nb"), "a b");
        let long = "x".repeat(500);
        let s = snippet(&long);
        assert!(s.chars().count() <= HISTORY_SNIPPET_MAX + 1);
        assert!(s.ends_with('…'));
    }

    #[test]
    fn icons_by_kind() {
        let ev = |role, content_type| ParsedEvent {
            role,
            content_type,
            text: String::new(),
            tool_use_id: None,
            tool_name: None,
            timestamp: None,
        };
        assert_eq!(icon(&ev(Role::User, ContentType::Text)), "👤");
        assert_eq!(icon(&ev(Role::Assistant, ContentType::ToolUse)), "🔧");
        assert_eq!(icon(&ev(Role::Assistant, ContentType::Text)), "🤖");
    }
}

//! Interactive terminal UI mirroring.
//!
//! When the assistant shows an in-terminal prompt (multi-choice,
//! permission, plan confirmation, checkpoint restore), the pane capture
//! is relayed into the topic with an inline keyboard that drives the
//! terminal cursor remotely.

use std::sync::Arc;
use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use tracing::{debug, info};

use muxbot_term::{extract_interactive_content, parse_options};

use crate::callback::{ArrowKey, CallbackAction};
use crate::send::{delete_message, edit_message, send_message};
use crate::state::Shared;

/// Tools whose transcript tool_use row triggers the interactive flow.
pub const INTERACTIVE_TOOL_NAMES: [&str; 2] = ["AskUserQuestion", "ExitPlanMode"];

/// Settle time between a keystroke and re-capturing the pane.
pub const KEY_SETTLE: Duration = Duration::from_millis(150);

pub fn is_interactive_tool(tool_name: Option<&str>) -> bool {
    tool_name.is_some_and(|name| INTERACTIVE_TOOL_NAMES.contains(&name))
}

fn btn(label: &str, action: CallbackAction) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(label, action.encode())
}

/// Navigation keyboard for an interactive UI.
///
/// `RestoreCheckpoint` is a vertical-only selector, so ←/→ are omitted;
/// `AskUserQuestion` additionally gets one labeled button per option.
fn build_keyboard(window_name: &str, ui_name: &str, options: &[String]) -> InlineKeyboardMarkup {
    let w = || window_name.to_string();
    let mut rows: Vec<Vec<InlineKeyboardButton>> = Vec::new();

    if ui_name == "AskUserQuestion" {
        for (i, label) in options.iter().enumerate() {
            let display: String = if label.chars().count() > 32 {
                let head: String = label.chars().take(31).collect();
                format!("{head}…")
            } else {
                label.clone()
            };
            rows.push(vec![btn(
                &display,
                CallbackAction::AskOption {
                    index: i,
                    window: w(),
                },
            )]);
        }
    }

    rows.push(vec![btn(
        "↑",
        CallbackAction::Arrow {
            key: ArrowKey::Up,
            window: w(),
        },
    )]);
    if ui_name == "RestoreCheckpoint" {
        rows.push(vec![btn(
            "↓",
            CallbackAction::Arrow {
                key: ArrowKey::Down,
                window: w(),
            },
        )]);
    } else {
        rows.push(vec![
            btn(
                "←",
                CallbackAction::Arrow {
                    key: ArrowKey::Left,
                    window: w(),
                },
            ),
            btn(
                "↓",
                CallbackAction::Arrow {
                    key: ArrowKey::Down,
                    window: w(),
                },
            ),
            btn(
                "→",
                CallbackAction::Arrow {
                    key: ArrowKey::Right,
                    window: w(),
                },
            ),
        ]);
    }
    rows.push(vec![
        btn("⎋ Esc", CallbackAction::AskEsc { window: w() }),
        btn("🔄", CallbackAction::AskRefresh { window: w() }),
        btn("⏎ Enter", CallbackAction::AskEnter { window: w() }),
    ]);

    InlineKeyboardMarkup::new(rows)
}

/// Capture the pane and mirror any interactive UI into the topic.
///
/// Returns true when a UI was detected and shown (or refreshed).
pub async fn handle_interactive_ui(
    bot: &Bot,
    shared: &Arc<Shared>,
    chat_id: i64,
    window_name: &str,
    thread_id: Option<i32>,
) -> bool {
    let ikey = Shared::topic_key(chat_id, thread_id);

    let Some(window) = shared.mux.find_window(window_name).await else {
        return false;
    };
    let Some(pane_text) = shared.mux.capture_pane(&window.window_id, false).await else {
        debug!(window = window_name, "no pane text captured");
        return false;
    };
    let Some(ui) = extract_interactive_content(&pane_text) else {
        debug!(window = window_name, "no interactive UI in pane");
        return false;
    };

    let options = parse_options(&ui.content);
    let keyboard = build_keyboard(window_name, ui.name, &options);

    // Refresh in place when a UI message already exists. Edit failures
    // here are almost always "message is not modified" — stay quiet and
    // keep the current message rather than sending a duplicate.
    if let Some(existing) = shared.interactive_msgs.get(&ikey).map(|e| *e.value()) {
        let _ = edit_message(bot, chat_id, existing, &ui.content, Some(keyboard)).await;
        shared
            .interactive_mode
            .insert(ikey, window_name.to_string());
        return true;
    }

    info!(chat = chat_id, window = window_name, ui = ui.name, "sending interactive UI");
    match send_message(bot, shared, chat_id, thread_id, &ui.content, Some(keyboard)).await {
        Ok(Some(sent)) => {
            shared.interactive_msgs.insert(ikey, sent.id);
            shared
                .interactive_mode
                .insert(ikey, window_name.to_string());
            true
        }
        _ => false,
    }
}

/// Which window (if any) holds this recipient in interactive mode.
pub fn interactive_window(shared: &Shared, chat_id: i64, thread_id: Option<i32>) -> Option<String> {
    shared
        .interactive_mode
        .get(&Shared::topic_key(chat_id, thread_id))
        .map(|e| e.value().clone())
}

pub fn set_interactive_mode(
    shared: &Shared,
    chat_id: i64,
    window_name: &str,
    thread_id: Option<i32>,
) {
    shared
        .interactive_mode
        .insert(Shared::topic_key(chat_id, thread_id), window_name.to_string());
}

/// Drop interactive mode without touching the message.
pub fn clear_interactive_mode(shared: &Shared, chat_id: i64, thread_id: Option<i32>) {
    shared
        .interactive_mode
        .remove(&Shared::topic_key(chat_id, thread_id));
}

pub fn interactive_msg_id(
    shared: &Shared,
    chat_id: i64,
    thread_id: Option<i32>,
) -> Option<teloxide::types::MessageId> {
    shared
        .interactive_msgs
        .get(&Shared::topic_key(chat_id, thread_id))
        .map(|e| *e.value())
}

/// Exit interactive mode and delete the UI message from the chat.
pub async fn clear_interactive_msg(
    bot: &Bot,
    shared: &Arc<Shared>,
    chat_id: i64,
    thread_id: Option<i32>,
) {
    let ikey = Shared::topic_key(chat_id, thread_id);
    let msg_id = shared.interactive_msgs.remove(&ikey).map(|(_, id)| id);
    shared.interactive_mode.remove(&ikey);
    debug!(chat = chat_id, ?thread_id, msg = ?msg_id.map(|m| m.0), "clearing interactive msg");
    if let Some(msg_id) = msg_id {
        delete_message(bot, chat_id, msg_id).await;
    }
}

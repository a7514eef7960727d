//! Telegram update handlers: commands, topic text, topic lifecycle, and
//! inline-keyboard callbacks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, ChatAction, MessageKind, ThreadId};
use tracing::{debug, info, warn};

use muxbot_transcript::{EXPANDABLE_QUOTE_END, EXPANDABLE_QUOTE_START};

use crate::browser::build_directory_browser;
use crate::callback::CallbackAction;
use crate::cleanup::clear_topic_state;
use crate::history::build_history_view;
use crate::interactive::{
    clear_interactive_msg, handle_interactive_ui, interactive_window, KEY_SETTLE,
};
use crate::send::{edit_message, reply, send_message, thread_of};
use crate::state::{BrowseMode, BrowseState, Shared};

/// Assistant slash commands surfaced in the bot menu and forwarded into
/// the terminal verbatim.
const FORWARDED_COMMANDS: [(&str, &str); 5] = [
    ("clear", "↗ Clear conversation history"),
    ("compact", "↗ Compact conversation context"),
    ("cost", "↗ Show token/cost usage"),
    ("help", "↗ Show assistant help"),
    ("memory", "↗ Edit project memory"),
];

/// Bot menu entries.
pub fn bot_commands() -> Vec<teloxide::types::BotCommand> {
    let mut commands = vec![
        teloxide::types::BotCommand::new("start", "Show welcome message"),
        teloxide::types::BotCommand::new("history", "Message history for this topic"),
        teloxide::types::BotCommand::new("screenshot", "Capture terminal screen"),
        teloxide::types::BotCommand::new("esc", "Send Escape to interrupt"),
        teloxide::types::BotCommand::new("kill", "Kill this topic's window"),
        teloxide::types::BotCommand::new("pathselect", "Browse directories for a new session"),
    ];
    for (name, description) in FORWARDED_COMMANDS {
        commands.push(teloxide::types::BotCommand::new(name, description));
    }
    commands
}

/// Thread id of a message; the general topic (id 1) counts as none.
fn thread_id_of(msg: &Message) -> Option<i32> {
    msg.thread_id.map(|t| t.0 .0).filter(|t| *t != 1)
}

async fn typing(bot: &Bot, chat_id: i64, thread_id: Option<i32>) {
    let mut action = bot.send_chat_action(ChatId(chat_id), ChatAction::Typing);
    if let Some(thread) = thread_of(thread_id) {
        action = action.message_thread_id(thread);
    }
    let _ = action.await;
}

/// Type `text` into the window bound to this name, with Enter.
async fn send_to_window(shared: &Shared, window_name: &str, text: &str) -> Result<(), String> {
    debug!(window = window_name, len = text.len(), "send to window");
    let Some(window) = shared.mux.find_window(window_name).await else {
        return Err("Window not found (may have been closed)".to_string());
    };
    if shared.mux.send_keys(&window.window_id, text, true, true).await {
        Ok(())
    } else {
        Err("Failed to send keys".to_string())
    }
}

/// Screenshot body: the ANSI-stripped pane inside a collapsible quote.
async fn screenshot_text(shared: &Shared, window_name: &str) -> Option<String> {
    let window = shared.mux.find_window(window_name).await?;
    let raw = shared.mux.capture_pane(&window.window_id, true).await?;
    let plain = String::from_utf8_lossy(&strip_ansi_escapes::strip(raw.as_bytes())).into_owned();
    Some(format!(
        "🖥 {window_name}\n{EXPANDABLE_QUOTE_START}{}{EXPANDABLE_QUOTE_END}",
        plain.trim_end()
    ))
}

fn screenshot_keyboard(window_name: &str) -> teloxide::types::InlineKeyboardMarkup {
    teloxide::types::InlineKeyboardMarkup::new(vec![vec![
        teloxide::types::InlineKeyboardButton::callback(
            "🔄 Refresh",
            CallbackAction::ScreenshotRefresh {
                window: window_name.to_string(),
            }
            .encode(),
        ),
    ]])
}

// ── Message handler ──────────────────────────────────────────────────

pub async fn message_handler(bot: Bot, msg: Message, shared: Arc<Shared>) -> ResponseResult<()> {
    // Topic lifecycle events arrive as service messages.
    if matches!(msg.kind, MessageKind::ForumTopicClosed(_)) {
        handle_topic_closed(&bot, &shared, &msg).await;
        return Ok(());
    }

    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    if user.is_bot {
        return Ok(());
    }
    if !shared.config.is_user_allowed(user.id.0) {
        if msg.text().is_some() {
            reply(&bot, &msg, "You are not authorized to use this bot.").await;
        }
        return Ok(());
    }

    let Some(text) = msg.text() else {
        // Photos, stickers, voice, … cannot go into a terminal.
        if matches!(msg.kind, MessageKind::Common(_)) {
            reply(
                &bot,
                &msg,
                "⚠ Only text messages are supported. Media cannot be forwarded to the terminal.",
            )
            .await;
        }
        return Ok(());
    };

    // An absolute path reply ("/tmp/proj") looks like a command; the
    // awaiting-path flow must see it first. /pathselect stays a command
    // so the user can switch to the browser instead of typing a path.
    let awaiting_path = shared
        .browse
        .get(&msg.chat.id.0)
        .map(|b| b.mode == BrowseMode::AwaitingPath)
        .unwrap_or(false)
        && !text.starts_with("/pathselect");

    if text.starts_with('/') && !awaiting_path {
        handle_command(&bot, &shared, &msg, text).await;
    } else {
        handle_text(&bot, &shared, &msg, text).await;
    }
    Ok(())
}

async fn handle_topic_closed(bot: &Bot, shared: &Arc<Shared>, msg: &Message) {
    let chat_id = msg.chat.id.0;
    let Some(thread_id) = thread_id_of(msg) else {
        return;
    };

    let Some(window_name) = shared.store.window_for_thread(chat_id, thread_id) else {
        debug!(chat = chat_id, thread = thread_id, "topic closed: no binding");
        return;
    };

    if let Some(window) = shared.mux.find_window(&window_name).await {
        shared.mux.kill_window(&window.window_id).await;
        info!(chat = chat_id, thread = thread_id, window = %window_name, "topic closed: killed window");
    } else {
        info!(chat = chat_id, thread = thread_id, window = %window_name, "topic closed: window already gone");
    }
    shared.store.unbind(chat_id, thread_id);
    clear_topic_state(bot, shared, chat_id, thread_id).await;
}

// ── Commands ─────────────────────────────────────────────────────────

async fn handle_command(bot: &Bot, shared: &Arc<Shared>, msg: &Message, text: &str) {
    let chat_id = msg.chat.id.0;
    let thread_id = thread_id_of(msg);

    // "/cmd@botname args" → "cmd"
    let word = text.split_whitespace().next().unwrap_or(text);
    let command = word
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or_default();

    match command {
        "start" => {
            shared.browse.remove(&chat_id);
            reply(
                bot,
                msg,
                "🤖 **Terminal Bridge**\n\nEach topic is a session. Create a new topic to start.",
            )
            .await;
        }
        "history" => handle_history_command(bot, shared, msg, chat_id, thread_id).await,
        "screenshot" => {
            let Some(window_name) = resolve_bound_window(bot, shared, msg, chat_id, thread_id).await
            else {
                return;
            };
            match screenshot_text(shared, &window_name).await {
                Some(body) => {
                    let _ = send_message(
                        bot,
                        shared,
                        chat_id,
                        thread_id,
                        &body,
                        Some(screenshot_keyboard(&window_name)),
                    )
                    .await;
                }
                None => reply(bot, msg, "❌ Failed to capture pane content.").await,
            }
        }
        "esc" => {
            let Some(window_name) = resolve_bound_window(bot, shared, msg, chat_id, thread_id).await
            else {
                return;
            };
            let Some(window) = shared.mux.find_window(&window_name).await else {
                reply(bot, msg, &format!("❌ Window '{window_name}' no longer exists.")).await;
                return;
            };
            shared.mux.send_keys(&window.window_id, "\x1b", false, true).await;
            reply(bot, msg, "⎋ Sent Escape").await;
        }
        "kill" => {
            let Some(thread_id) = thread_id else {
                reply(bot, msg, "❌ Use this in a named topic.").await;
                return;
            };
            let Some(window_name) = shared.store.window_for_thread(chat_id, thread_id) else {
                reply(bot, msg, "❌ No session bound to this topic.").await;
                return;
            };
            if let Some(window) = shared.mux.find_window(&window_name).await {
                shared.mux.kill_window(&window.window_id).await;
            }
            shared.store.unbind(chat_id, thread_id);
            clear_topic_state(bot, shared, chat_id, thread_id).await;
            reply(bot, msg, &format!("🗑 Killed window '{window_name}' and unbound this topic.")).await;
        }
        "pathselect" => handle_pathselect(bot, shared, msg, chat_id, thread_id).await,
        _ => forward_command(bot, shared, msg, text, chat_id, thread_id).await,
    }
}

/// Resolve the window bound to this topic, replying on failure.
async fn resolve_bound_window(
    bot: &Bot,
    shared: &Arc<Shared>,
    msg: &Message,
    chat_id: i64,
    thread_id: Option<i32>,
) -> Option<String> {
    let window = thread_id.and_then(|t| shared.store.window_for_thread(chat_id, t));
    if window.is_none() {
        reply(bot, msg, "❌ No session bound to this topic.").await;
    }
    window
}

async fn handle_history_command(
    bot: &Bot,
    shared: &Arc<Shared>,
    msg: &Message,
    chat_id: i64,
    thread_id: Option<i32>,
) {
    let Some(window_name) = resolve_bound_window(bot, shared, msg, chat_id, thread_id).await else {
        return;
    };

    let Some(info) = shared.store.unread_info(chat_id, &window_name).await else {
        reply(bot, msg, "❌ No session history available.").await;
        return;
    };

    // Pin the range at the current end; initial view shows the newest page.
    let Some(view) = build_history_view(shared, &window_name, 0, 0, info.end_offset).await else {
        reply(bot, msg, "❌ No session history available.").await;
        return;
    };
    let _ = send_message(bot, shared, chat_id, thread_id, &view.text, view.keyboard).await;

    // Viewing history marks everything as read.
    shared
        .store
        .update_read_offset(chat_id, &window_name, info.end_offset);
}

async fn handle_pathselect(
    bot: &Bot,
    shared: &Arc<Shared>,
    msg: &Message,
    chat_id: i64,
    thread_id: Option<i32>,
) {
    let Some(thread_id) = thread_id else {
        reply(bot, msg, "❌ Use this in a named topic.").await;
        return;
    };
    if let Some(window_name) = shared.store.window_for_thread(chat_id, thread_id) {
        reply(bot, msg, &format!("❌ Topic already bound to window '{window_name}'.")).await;
        return;
    }

    let start_path = shared
        .config
        .browse
        .start_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/".into())));

    let (text, keyboard, dirs) = build_directory_browser(&start_path, 0);
    let pending_text = shared
        .browse
        .get(&chat_id)
        .and_then(|b| b.pending_text.clone());
    shared.browse.insert(
        chat_id,
        BrowseState {
            mode: BrowseMode::Browsing,
            path: start_path,
            page: 0,
            dirs,
            pending_thread: Some(thread_id),
            // Keep any text stashed by the awaiting-path flow.
            pending_text,
        },
    );
    let _ = send_message(bot, shared, chat_id, Some(thread_id), &text, Some(keyboard)).await;
}

async fn forward_command(
    bot: &Bot,
    shared: &Arc<Shared>,
    msg: &Message,
    text: &str,
    chat_id: i64,
    thread_id: Option<i32>,
) {
    // Strip the bot-mention suffix but keep arguments.
    let slash = text.split('@').next().unwrap_or(text).to_string();

    let Some(window_name) = resolve_bound_window(bot, shared, msg, chat_id, thread_id).await else {
        return;
    };

    info!(command = %slash, window = %window_name, "forwarding command");
    typing(bot, chat_id, thread_id).await;
    match send_to_window(shared, &window_name, &slash).await {
        Ok(()) => {
            reply(bot, msg, &format!("⚡ [{window_name}] Sent: {slash}")).await;
            // After /clear the next hook entry starts a new session.
            if slash.trim().eq_ignore_ascii_case("/clear") {
                info!(window = %window_name, "clearing session after /clear");
                shared.store.clear_window_session(&window_name);
            }
        }
        Err(e) => reply(bot, msg, &format!("❌ {e}")).await,
    }
}

// ── Plain text ───────────────────────────────────────────────────────

async fn handle_text(bot: &Bot, shared: &Arc<Shared>, msg: &Message, text: &str) {
    let chat_id = msg.chat.id.0;
    let thread_id = thread_id_of(msg);

    let browse_mode = shared
        .browse
        .get(&chat_id)
        .map(|b| b.mode)
        .unwrap_or(BrowseMode::Idle);

    match browse_mode {
        BrowseMode::Browsing => {
            reply(bot, msg, "Please use the directory browser above, or tap Cancel.").await;
        }
        BrowseMode::AwaitingPath => handle_path_input(bot, shared, msg, chat_id, text).await,
        BrowseMode::Idle => {
            let Some(thread_id) = thread_id else {
                reply(
                    bot,
                    msg,
                    "❌ Please use a named topic. Create a new topic to start a session.",
                )
                .await;
                return;
            };

            match shared.store.window_for_thread(chat_id, thread_id) {
                None => {
                    // Unbound topic: stash the text, ask for a directory.
                    info!(chat = chat_id, thread = thread_id, "unbound topic: prompting for path");
                    shared.browse.insert(
                        chat_id,
                        BrowseState {
                            mode: BrowseMode::AwaitingPath,
                            pending_thread: Some(thread_id),
                            pending_text: Some(text.to_string()),
                            ..Default::default()
                        },
                    );
                    reply(
                        bot,
                        msg,
                        "📂 Send a working directory path, or use /pathselect for the browser.",
                    )
                    .await;
                }
                Some(window_name) => {
                    forward_text_to_window(bot, shared, msg, chat_id, thread_id, &window_name, text)
                        .await;
                }
            }
        }
    }
}

async fn forward_text_to_window(
    bot: &Bot,
    shared: &Arc<Shared>,
    msg: &Message,
    chat_id: i64,
    thread_id: i32,
    window_name: &str,
    text: &str,
) {
    if shared.mux.find_window(window_name).await.is_none() {
        info!(chat = chat_id, thread = thread_id, window = %window_name, "stale binding, unbinding");
        shared.store.unbind(chat_id, thread_id);
        reply(
            bot,
            msg,
            &format!(
                "❌ Window '{window_name}' no longer exists. Binding removed.\nSend a message to start a new session."
            ),
        )
        .await;
        return;
    }

    typing(bot, chat_id, Some(thread_id)).await;
    // The next status capture must not edit a stale message id.
    shared.status_msgs.remove(&(chat_id, thread_id));

    if let Err(e) = send_to_window(shared, window_name, text).await {
        reply(bot, msg, &format!("❌ {e}")).await;
        return;
    }

    // Typing into an open prompt moves its state; refresh the mirror.
    if interactive_window(shared, chat_id, Some(thread_id)).as_deref() == Some(window_name) {
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle_interactive_ui(bot, shared, chat_id, window_name, Some(thread_id)).await;
    }
}

/// A path reply in the awaiting-path flow: create the window, wait for
/// the hook to register the new session, bind, rename, forward.
async fn handle_path_input(
    bot: &Bot,
    shared: &Arc<Shared>,
    msg: &Message,
    chat_id: i64,
    text: &str,
) {
    let (pending_thread, pending_text) = {
        let Some(mut browse) = shared.browse.get_mut(&chat_id) else {
            return;
        };
        browse.mode = BrowseMode::Idle;
        (browse.pending_thread, browse.pending_text.clone())
    };

    let selected = text.trim();
    match bind_new_window(bot, shared, chat_id, pending_thread, selected).await {
        Ok(window_name) => {
            reply(bot, msg, &format!("✅ Created window '{window_name}'.\n\nBound to this topic.")).await;
            finish_pending(bot, shared, chat_id, &window_name, pending_text).await;
        }
        Err(e) => {
            reply(bot, msg, &format!("❌ {e}")).await;
            if let Some(mut browse) = shared.browse.get_mut(&chat_id) {
                browse.pending_thread = None;
                browse.pending_text = None;
            }
        }
    }
}

/// Shared tail of the path-reply and browser-confirm flows.
async fn bind_new_window(
    bot: &Bot,
    shared: &Arc<Shared>,
    chat_id: i64,
    pending_thread: Option<i32>,
    work_dir: &str,
) -> Result<String, String> {
    let created = shared
        .mux
        .create_window(work_dir, None, true)
        .await
        .map_err(|e| e.to_string())?;

    // The window may be recycled: skip the stale session id so only the
    // hook entry written by this fresh start counts.
    let old_sid = {
        let state = shared.store.window_state(&created.window_name);
        (!state.session_id.is_empty()).then_some(state.session_id)
    };
    shared
        .store
        .wait_for_session_map_entry(
            &created.window_name,
            old_sid.as_deref(),
            Duration::from_secs(5),
        )
        .await;

    if let Some(thread_id) = pending_thread {
        shared.store.bind(chat_id, thread_id, &created.window_name);
        // Rename the topic after the window so they stay in sync.
        let rename = bot
            .edit_forum_topic(ChatId(chat_id), ThreadId(teloxide::types::MessageId(thread_id)))
            .name(created.window_name.clone())
            .await;
        if let Err(e) = rename {
            debug!(error = %e, "failed to rename topic");
        }
    }
    Ok(created.window_name)
}

/// Forward the stashed text (if any) and clear the pending fields.
async fn finish_pending(
    bot: &Bot,
    shared: &Arc<Shared>,
    chat_id: i64,
    window_name: &str,
    pending_text: Option<String>,
) {
    let thread_id = {
        let Some(mut browse) = shared.browse.get_mut(&chat_id) else {
            return;
        };
        let thread = browse.pending_thread;
        browse.pending_thread = None;
        browse.pending_text = None;
        thread
    };

    if let Some(text) = pending_text {
        debug!(window = window_name, len = text.len(), "forwarding pending text");
        if let Err(e) = send_to_window(shared, window_name, &text).await {
            warn!(error = %e, "failed to forward pending text");
            let _ = send_message(
                bot,
                shared,
                chat_id,
                thread_id,
                &format!("❌ Failed to send pending message: {e}"),
                None,
            )
            .await;
        }
    }
}

// ── Callback queries ─────────────────────────────────────────────────

async fn answer(bot: &Bot, q: &CallbackQuery, text: Option<&str>) {
    let mut req = bot.answer_callback_query(q.id.clone());
    if let Some(text) = text {
        req = req.text(text);
    }
    let _ = req.await;
}

async fn answer_alert(bot: &Bot, q: &CallbackQuery, text: &str) {
    let _ = bot
        .answer_callback_query(q.id.clone())
        .text(text)
        .show_alert(true)
        .await;
}

pub async fn callback_handler(bot: Bot, q: CallbackQuery, shared: Arc<Shared>) -> ResponseResult<()> {
    let Some(data) = q.data.as_deref() else {
        return Ok(());
    };
    if !shared.config.is_user_allowed(q.from.id.0) {
        answer(&bot, &q, Some("Not authorized")).await;
        return Ok(());
    }

    let Some(action) = CallbackAction::parse(data) else {
        answer(&bot, &q, Some("Invalid data")).await;
        return Ok(());
    };

    let message = q.message.as_ref().and_then(|m| m.regular_message());
    let Some(message) = message else {
        answer(&bot, &q, None).await;
        return Ok(());
    };
    let chat_id = message.chat.id.0;
    let message_id = message.id;
    let thread_id = thread_id_of(message);

    match action {
        CallbackAction::Noop => answer(&bot, &q, None).await,

        CallbackAction::HistoryPage {
            page,
            window,
            start_byte,
            end_byte,
            ..
        } => {
            if shared.mux.find_window(&window).await.is_none() {
                let _ = edit_message(&bot, chat_id, message_id, "Window no longer exists.", None)
                    .await;
                answer(&bot, &q, None).await;
                return Ok(());
            }
            if let Some(view) =
                build_history_view(&shared, &window, page, start_byte, end_byte).await
            {
                let _ = edit_message(&bot, chat_id, message_id, &view.text, view.keyboard).await;
            }
            answer(&bot, &q, Some("Page updated")).await;
        }

        CallbackAction::DirSelect { index } => {
            let Some(subdir) = shared
                .browse
                .get(&chat_id)
                .and_then(|b| b.dirs.get(index).cloned())
            else {
                answer_alert(&bot, &q, "Directory list changed, please refresh").await;
                return Ok(());
            };
            let current = shared
                .browse
                .get(&chat_id)
                .map(|b| b.path.clone())
                .unwrap_or_default();
            let new_path = current.join(subdir);
            if !new_path.is_dir() {
                answer_alert(&bot, &q, "Directory not found").await;
                return Ok(());
            }
            refresh_browser(&bot, &shared, chat_id, message_id, new_path, 0).await;
            answer(&bot, &q, None).await;
        }

        CallbackAction::DirUp => {
            let current = shared
                .browse
                .get(&chat_id)
                .map(|b| b.path.clone())
                .unwrap_or_default();
            let parent = current.parent().map(|p| p.to_path_buf()).unwrap_or(current);
            refresh_browser(&bot, &shared, chat_id, message_id, parent, 0).await;
            answer(&bot, &q, None).await;
        }

        CallbackAction::DirPage { page } => {
            let current = shared
                .browse
                .get(&chat_id)
                .map(|b| b.path.clone())
                .unwrap_or_default();
            refresh_browser(&bot, &shared, chat_id, message_id, current, page).await;
            answer(&bot, &q, None).await;
        }

        CallbackAction::DirConfirm => {
            let (path, pending_thread) = {
                let Some(browse) = shared.browse.get(&chat_id) else {
                    answer(&bot, &q, Some("Nothing selected")).await;
                    return Ok(());
                };
                (browse.path.clone(), browse.pending_thread)
            };
            if let Some(mut browse) = shared.browse.get_mut(&chat_id) {
                browse.mode = BrowseMode::Idle;
                browse.dirs.clear();
            }

            match bind_new_window(
                &bot,
                &shared,
                chat_id,
                pending_thread,
                &path.display().to_string(),
            )
            .await
            {
                Ok(window_name) => {
                    let _ = edit_message(
                        &bot,
                        chat_id,
                        message_id,
                        &format!("✅ Created window '{window_name}'.\n\nBound to this topic. Send messages here."),
                        None,
                    )
                    .await;
                    let pending_text = shared
                        .browse
                        .get(&chat_id)
                        .and_then(|b| b.pending_text.clone());
                    finish_pending(&bot, &shared, chat_id, &window_name, pending_text).await;
                    answer(&bot, &q, Some("Created")).await;
                }
                Err(e) => {
                    let _ = edit_message(&bot, chat_id, message_id, &format!("❌ {e}"), None).await;
                    if let Some(mut browse) = shared.browse.get_mut(&chat_id) {
                        browse.pending_thread = None;
                        browse.pending_text = None;
                    }
                    answer(&bot, &q, Some("Failed")).await;
                }
            }
        }

        CallbackAction::DirCancel => {
            shared.browse.remove(&chat_id);
            let _ = edit_message(&bot, chat_id, message_id, "Cancelled", None).await;
            answer(&bot, &q, Some("Cancelled")).await;
        }

        CallbackAction::ScreenshotRefresh { window } => {
            match screenshot_text(&shared, &window).await {
                Some(body) => {
                    let _ = edit_message(
                        &bot,
                        chat_id,
                        message_id,
                        &body,
                        Some(screenshot_keyboard(&window)),
                    )
                    .await;
                    answer(&bot, &q, Some("Refreshed")).await;
                }
                None => answer_alert(&bot, &q, "Window no longer exists").await,
            }
        }

        CallbackAction::Arrow { key, window } => {
            if let Some(w) = shared.mux.find_window(&window).await {
                shared.mux.send_keys(&w.window_id, key.key_token(), false, false).await;
                tokio::time::sleep(KEY_SETTLE).await;
                handle_interactive_ui(&bot, &shared, chat_id, &window, thread_id).await;
            }
            answer(&bot, &q, None).await;
        }

        CallbackAction::AskEsc { window } => {
            if let Some(w) = shared.mux.find_window(&window).await {
                shared.mux.send_keys(&w.window_id, "Escape", false, false).await;
                clear_interactive_msg(&bot, &shared, chat_id, thread_id).await;
            }
            answer(&bot, &q, Some("⎋ Esc")).await;
        }

        CallbackAction::AskEnter { window } => {
            if let Some(w) = shared.mux.find_window(&window).await {
                shared.mux.send_keys(&w.window_id, "Enter", false, false).await;
                tokio::time::sleep(KEY_SETTLE).await;
                handle_interactive_ui(&bot, &shared, chat_id, &window, thread_id).await;
            }
            answer(&bot, &q, Some("⏎ Enter")).await;
        }

        CallbackAction::AskRefresh { window } => {
            handle_interactive_ui(&bot, &shared, chat_id, &window, thread_id).await;
            answer(&bot, &q, Some("🔄")).await;
        }

        CallbackAction::AskOption { index, window } => {
            if let Some(w) = shared.mux.find_window(&window).await {
                // Home the cursor, then step down to the chosen option.
                for _ in 0..10 {
                    shared.mux.send_keys(&w.window_id, "Up", false, false).await;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                for _ in 0..index {
                    shared.mux.send_keys(&w.window_id, "Down", false, false).await;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
                shared.mux.send_keys(&w.window_id, "Enter", false, false).await;
                tokio::time::sleep(Duration::from_millis(200)).await;
                // Multi-question prompts show the next step immediately.
                handle_interactive_ui(&bot, &shared, chat_id, &window, thread_id).await;
            }
            answer(&bot, &q, Some("Selected")).await;
        }
    }

    Ok(())
}

/// Rebuild the browser view at `path`/`page` and edit it in place.
async fn refresh_browser(
    bot: &Bot,
    shared: &Arc<Shared>,
    chat_id: i64,
    message_id: teloxide::types::MessageId,
    path: PathBuf,
    page: usize,
) {
    let (text, keyboard, dirs) = build_directory_browser(&path, page);
    if let Some(mut browse) = shared.browse.get_mut(&chat_id) {
        browse.path = path;
        browse.page = page;
        browse.dirs = dirs;
    }
    let _ = edit_message(bot, chat_id, message_id, &text, Some(keyboard)).await;
}

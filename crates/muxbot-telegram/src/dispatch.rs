//! Bridge from transcript-monitor events to topic deliveries.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use teloxide::prelude::*;
use tracing::{debug, info};

use muxbot_core::config::NotifyMode;
use muxbot_monitor::{EventCallback, SessionEvent};
use muxbot_transcript::ContentType;

use crate::interactive::{
    clear_interactive_mode, clear_interactive_msg, handle_interactive_ui, interactive_msg_id,
    is_interactive_tool, set_interactive_mode,
};
use crate::queue::enqueue_content;
use crate::response::build_response_parts;
use crate::state::Shared;

/// Grace period for the assistant to render the question UI after the
/// tool_use row lands in the transcript.
const UI_RENDER_DELAY: Duration = Duration::from_millis(300);

/// Mark these transcript bytes as read for the chat.
async fn update_read_offset(shared: &Arc<Shared>, chat_id: i64, window_name: &str) {
    if let Some(session) = shared.store.resolve_session_for_window(window_name).await {
        if let Ok(metadata) = tokio::fs::metadata(&session.file_path).await {
            shared
                .store
                .update_read_offset(chat_id, window_name, metadata.len());
        }
    }
}

/// Route one transcript event to every topic bound to its session.
pub async fn handle_session_event(bot: Bot, shared: Arc<Shared>, ev: SessionEvent) {
    debug!(
        session = %ev.session_id,
        content_type = ?ev.event.content_type,
        "handling session event"
    );

    let recipients = shared
        .store
        .find_recipients_for_session(&ev.session_id)
        .await;
    if recipients.is_empty() {
        info!(session = %ev.session_id, "no recipients bound to session");
        return;
    }

    for (chat_id, window_name, thread_id) in recipients {
        let thread = Some(thread_id);

        // Interactive tools are mirrored as pane captures + keyboards,
        // not as ordinary tool_use messages.
        if ev.event.content_type == ContentType::ToolUse
            && is_interactive_tool(ev.event.tool_name.as_deref())
        {
            // Mark interactive mode BEFORE the render delay so the pane
            // poller skips this window meanwhile.
            set_interactive_mode(&shared, chat_id, &window_name, thread);

            // Let pending content (e.g. the plan body) land first — the
            // keyboard must never overtake prior messages.
            if let Some(queue) = shared.queues.get(chat_id) {
                queue.join().await;
            }
            tokio::time::sleep(UI_RENDER_DELAY).await;

            if handle_interactive_ui(&bot, &shared, chat_id, &window_name, thread).await {
                update_read_offset(&shared, chat_id, &window_name).await;
                continue;
            }
            // UI never rendered — undo the early mode set.
            clear_interactive_mode(&shared, chat_id, thread);
        }

        // Any non-interactive traffic means the interaction finished.
        if interactive_msg_id(&shared, chat_id, thread).is_some() {
            clear_interactive_msg(&bot, &shared, chat_id, thread).await;
        }

        // Interactive notify mode suppresses ordinary content; prompts
        // are still caught above and by the pane poller.
        if shared.config.notify.mode == NotifyMode::Interactive {
            continue;
        }

        let parts = build_response_parts(&ev.event.text, ev.event.content_type, ev.event.role);
        enqueue_content(
            &bot,
            &shared,
            chat_id,
            &window_name,
            parts,
            ev.event.tool_use_id.clone(),
            ev.event.content_type,
            thread,
        );

        update_read_offset(&shared, chat_id, &window_name).await;
    }
}

/// Adapt `handle_session_event` to the monitor's callback signature.
pub fn make_event_callback(bot: Bot, shared: Arc<Shared>) -> EventCallback {
    Arc::new(move |ev: SessionEvent| -> BoxFuture<'static, ()> {
        let bot = bot.clone();
        let shared = Arc::clone(&shared);
        Box::pin(handle_session_event(bot, shared, ev))
    })
}

//! Pane poller: a 1 Hz sweep over all bindings that keeps status lines
//! fresh, mirrors interactive UIs the transcript never records
//! (permission prompts), and reaps stale bindings and deleted topics.

use std::sync::Arc;
use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::{MessageId, ThreadId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use muxbot_core::config::{STATUS_POLL_INTERVAL_SECS, TOPIC_CHECK_INTERVAL_SECS};
use muxbot_term::{is_interactive_ui, parse_status_line};

use crate::cleanup::clear_topic_state;
use crate::interactive::{clear_interactive_msg, handle_interactive_ui, interactive_window};
use crate::queue::enqueue_status;
use crate::state::Shared;

/// Poll the terminal behind one binding and refresh its status message.
///
/// Runs the interactive-UI state machine first: an active UI suppresses
/// status updates, a vanished UI clears interactive mode (without
/// re-checking for a new one the same tick), and a fresh UI enters
/// interactive mode.
pub async fn update_status_message(
    bot: &Bot,
    shared: &Arc<Shared>,
    chat_id: i64,
    window_name: &str,
    thread_id: Option<i32>,
) {
    let Some(window) = shared.mux.find_window(window_name).await else {
        // Window gone; the caller's stale-binding pass will reap it.
        enqueue_status(bot, shared, chat_id, window_name, None, thread_id);
        return;
    };

    let Some(pane_text) = shared.mux.capture_pane(&window.window_id, false).await else {
        // Transient capture failure — keep the existing status message.
        return;
    };

    let mut check_new_ui = true;
    match interactive_window(shared, chat_id, thread_id) {
        Some(active) if active == window_name => {
            if is_interactive_ui(&pane_text) {
                // Still interacting; the UI message is refreshed via the
                // keyboard callbacks, not the poller.
                return;
            }
            // UI just disappeared: leave interactive mode, and skip the
            // new-UI check this tick so we do not instantly re-enter.
            clear_interactive_msg(bot, shared, chat_id, thread_id).await;
            check_new_ui = false;
        }
        Some(_) => {
            // Interactive mode points at a different window — stale.
            clear_interactive_msg(bot, shared, chat_id, thread_id).await;
        }
        None => {}
    }

    if check_new_ui && is_interactive_ui(&pane_text) {
        handle_interactive_ui(bot, shared, chat_id, window_name, thread_id).await;
        return;
    }

    if let Some(status_line) = parse_status_line(&pane_text) {
        enqueue_status(bot, shared, chat_id, window_name, Some(status_line), thread_id);
    }
    // No status line: keep the existing message — transient states must
    // not flap it.
}

/// Probe every bound topic with a benign call; a TOPIC_ID_INVALID reply
/// means the topic was deleted behind our back.
async fn probe_topics(bot: &Bot, shared: &Arc<Shared>) {
    for (chat_id, thread_id, window_name) in shared.store.iter_bindings() {
        let result = bot
            .unpin_all_forum_topic_messages(ChatId(chat_id), ThreadId(MessageId(thread_id)))
            .await;
        let Err(e) = result else {
            continue;
        };

        let text = e.to_string();
        if text.to_lowercase().contains("topic_id_invalid") {
            if let Some(window) = shared.mux.find_window(&window_name).await {
                shared.mux.kill_window(&window.window_id).await;
            }
            shared.store.unbind(chat_id, thread_id);
            clear_topic_state(bot, shared, chat_id, thread_id).await;
            info!(
                chat = chat_id,
                thread = thread_id,
                window = %window_name,
                "topic deleted: killed window and unbound"
            );
        } else {
            debug!(window = %window_name, error = %text, "topic probe error");
        }
    }
}

/// The poller task. One tick per second over a snapshot of all bindings;
/// every 60 s the topic-existence probe runs first.
pub async fn status_poll_loop(bot: Bot, shared: Arc<Shared>, cancel: CancellationToken) {
    info!(interval = STATUS_POLL_INTERVAL_SECS, "status polling started");
    let tick = Duration::from_secs_f64(STATUS_POLL_INTERVAL_SECS);
    let probe_every = Duration::from_secs_f64(TOPIC_CHECK_INTERVAL_SECS);
    let mut last_topic_check = tokio::time::Instant::now() - probe_every;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(tick) => {}
        }

        if last_topic_check.elapsed() >= probe_every {
            last_topic_check = tokio::time::Instant::now();
            probe_topics(&bot, &shared).await;
        }

        for (chat_id, thread_id, window_name) in shared.store.iter_bindings() {
            // Stale binding: the window vanished externally.
            if shared.mux.find_window(&window_name).await.is_none() {
                shared.store.unbind(chat_id, thread_id);
                clear_topic_state(&bot, &shared, chat_id, thread_id).await;
                info!(
                    chat = chat_id,
                    thread = thread_id,
                    window = %window_name,
                    "cleaned up stale binding"
                );
                continue;
            }

            // A busy queue means content is in flight; a status update
            // now could edit a message the queue is about to replace.
            if let Some(queue) = shared.queues.get(chat_id) {
                if !queue.is_empty() {
                    continue;
                }
            }

            update_status_message(&bot, &shared, chat_id, &window_name, Some(thread_id)).await;
        }
    }

    info!("status polling stopped");
}

/// Spawn the poller; the returned token stops it.
pub fn spawn_status_poller(bot: Bot, shared: Arc<Shared>) -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        status_poll_loop(bot, shared, token).await;
    });
    cancel
}

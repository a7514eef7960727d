//! Per-chat ordered delivery queues.
//!
//! One unbounded channel and one consumer task per chat id guarantee
//! strict FIFO delivery for everything aimed at that chat — transcript
//! events and poller status updates share the same lane. The consumer
//! drains the channel into a local backlog before merging, so producers
//! arriving mid-merge stay ordered behind the residue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use teloxide::prelude::*;
use teloxide::types::ChatAction;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use muxbot_core::config::MERGE_MAX_LENGTH;
use muxbot_term::parse_status_line;
use muxbot_transcript::ContentType;

use crate::send::{delete_message, edit_message, send_message, thread_of};
use crate::state::{Shared, StatusMsgInfo};

/// A unit of work for a chat's consumer.
#[derive(Debug, Clone)]
pub enum DeliveryTask {
    Content {
        parts: Vec<String>,
        tool_use_id: Option<String>,
        content_type: ContentType,
        window_name: String,
        thread_id: Option<i32>,
    },
    StatusUpdate {
        text: String,
        window_name: String,
        thread_id: Option<i32>,
    },
    StatusClear {
        thread_id: Option<i32>,
    },
}

/// Producer-side handle to a chat's queue.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<DeliveryTask>,
    pending: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl QueueHandle {
    pub fn enqueue(&self, task: DeliveryTask) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(task).is_err() {
            // Worker gone (shutdown); the counter must not leak.
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// True when nothing is queued or being processed.
    pub fn is_empty(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }

    /// Wait until every task enqueued so far has been processed.
    pub async fn join(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

/// Registry of per-chat queues and their consumer tasks.
pub struct QueueHub {
    handles: DashMap<i64, QueueHandle>,
    workers: DashMap<i64, JoinHandle<()>>,
}

impl Default for QueueHub {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueHub {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            workers: DashMap::new(),
        }
    }

    pub fn get(&self, chat_id: i64) -> Option<QueueHandle> {
        self.handles.get(&chat_id).map(|h| h.clone())
    }

    /// Get the chat's queue, lazily spawning its consumer. The entry API
    /// keeps concurrent first-enqueues from racing two workers into
    /// existence for the same chat.
    pub fn get_or_create(&self, bot: &Bot, shared: &Arc<Shared>, chat_id: i64) -> QueueHandle {
        match self.handles.entry(chat_id) {
            dashmap::mapref::entry::Entry::Occupied(entry) => entry.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let handle = QueueHandle {
                    tx,
                    pending: Arc::new(AtomicUsize::new(0)),
                    notify: Arc::new(Notify::new()),
                };
                entry.insert(handle.clone());

                let worker = tokio::spawn(queue_worker(
                    bot.clone(),
                    Arc::clone(shared),
                    chat_id,
                    rx,
                    Arc::clone(&handle.pending),
                    Arc::clone(&handle.notify),
                ));
                self.workers.insert(chat_id, worker);
                info!(chat = chat_id, "delivery queue worker started");
                handle
            }
        }
    }

    /// Abort every consumer (shutdown path).
    pub fn shutdown(&self) {
        for entry in self.workers.iter() {
            entry.value().abort();
        }
        self.workers.clear();
        self.handles.clear();
        info!("delivery queue workers stopped");
    }
}

/// Enqueue a content message for a recipient.
pub fn enqueue_content(
    bot: &Bot,
    shared: &Arc<Shared>,
    chat_id: i64,
    window_name: &str,
    parts: Vec<String>,
    tool_use_id: Option<String>,
    content_type: ContentType,
    thread_id: Option<i32>,
) {
    debug!(chat = chat_id, window = window_name, ?content_type, "enqueue content");
    let handle = shared.queues.get_or_create(bot, shared, chat_id);
    handle.enqueue(DeliveryTask::Content {
        parts,
        tool_use_id,
        content_type,
        window_name: window_name.to_string(),
        thread_id,
    });
}

/// Enqueue a status update (or a clear when `text` is `None`).
pub fn enqueue_status(
    bot: &Bot,
    shared: &Arc<Shared>,
    chat_id: i64,
    window_name: &str,
    text: Option<String>,
    thread_id: Option<i32>,
) {
    let handle = shared.queues.get_or_create(bot, shared, chat_id);
    match text {
        Some(text) => handle.enqueue(DeliveryTask::StatusUpdate {
            text,
            window_name: window_name.to_string(),
            thread_id,
        }),
        None => handle.enqueue(DeliveryTask::StatusClear { thread_id }),
    }
}

// ── Merging ──────────────────────────────────────────────────────────

fn task_len(parts: &[String]) -> usize {
    parts.iter().map(String::len).sum()
}

/// Whether `candidate` can be absorbed into a content task for
/// `base_window` with `base_type`.
fn can_merge(base_window: &str, base_type: ContentType, candidate: &DeliveryTask) -> bool {
    let DeliveryTask::Content {
        window_name,
        content_type,
        ..
    } = candidate
    else {
        return false;
    };
    if window_name != base_window {
        return false;
    }
    // Tool messages break the chain: tool_use is a future edit target,
    // tool_result edits a previous message.
    !base_type.breaks_merge() && !content_type.breaks_merge()
}

/// Absorb leading mergeable content tasks from the backlog into `first`.
/// Returns the merged task and how many backlog tasks were absorbed.
fn merge_from_backlog(
    first: DeliveryTask,
    backlog: &mut VecDeque<DeliveryTask>,
) -> (DeliveryTask, usize) {
    let DeliveryTask::Content {
        mut parts,
        tool_use_id,
        content_type,
        window_name,
        thread_id,
    } = first
    else {
        return (first, 0);
    };

    let mut absorbed = 0;
    let mut current_len = task_len(&parts);

    while let Some(candidate) = backlog.front() {
        if !can_merge(&window_name, content_type, candidate) {
            break;
        }
        let DeliveryTask::Content { parts: cand_parts, .. } = candidate else {
            break;
        };
        let cand_len = task_len(cand_parts);
        if current_len + cand_len > MERGE_MAX_LENGTH {
            break;
        }
        let Some(DeliveryTask::Content { parts: cand_parts, .. }) = backlog.pop_front() else {
            break;
        };
        parts.extend(cand_parts);
        current_len += cand_len;
        absorbed += 1;
    }

    (
        DeliveryTask::Content {
            parts,
            tool_use_id,
            content_type,
            window_name,
            thread_id,
        },
        absorbed,
    )
}

// ── Consumer ─────────────────────────────────────────────────────────

async fn queue_worker(
    bot: Bot,
    shared: Arc<Shared>,
    chat_id: i64,
    mut rx: UnboundedReceiver<DeliveryTask>,
    pending: Arc<AtomicUsize>,
    notify: Arc<Notify>,
) {
    let mut backlog: VecDeque<DeliveryTask> = VecDeque::new();

    loop {
        let task = match backlog.pop_front() {
            Some(task) => task,
            None => match rx.recv().await {
                Some(task) => task,
                None => break,
            },
        };

        // Pull everything already enqueued behind the residue, then try
        // to merge consecutive content tasks.
        while let Ok(extra) = rx.try_recv() {
            backlog.push_back(extra);
        }
        let (task, absorbed) = merge_from_backlog(task, &mut backlog);
        if absorbed > 0 {
            debug!(chat = chat_id, absorbed, "merged content tasks");
        }
        let completed = 1 + absorbed;

        // Flood-control waits retry the same task; anything else is
        // logged inside and the task counts as done.
        loop {
            let rest_empty = backlog.is_empty() && rx.is_empty();
            match process_task(&bot, &shared, chat_id, &task, rest_empty).await {
                Ok(()) => break,
                Err(wait) => {
                    warn!(chat = chat_id, ?wait, "flood control, pausing queue");
                    tokio::time::sleep(wait).await;
                }
            }
        }

        pending.fetch_sub(completed, Ordering::AcqRel);
        notify.notify_waiters();
    }
}

async fn process_task(
    bot: &Bot,
    shared: &Arc<Shared>,
    chat_id: i64,
    task: &DeliveryTask,
    queue_rest_empty: bool,
) -> Result<(), Duration> {
    match task {
        DeliveryTask::Content {
            parts,
            tool_use_id,
            content_type,
            window_name,
            thread_id,
        } => {
            process_content(
                bot,
                shared,
                chat_id,
                parts,
                tool_use_id.as_deref(),
                *content_type,
                window_name,
                *thread_id,
                queue_rest_empty,
            )
            .await
        }
        DeliveryTask::StatusUpdate {
            text,
            window_name,
            thread_id,
        } => process_status_update(bot, shared, chat_id, text, window_name, *thread_id).await,
        DeliveryTask::StatusClear { thread_id } => {
            clear_status_message(bot, shared, chat_id, thread_id.unwrap_or(0)).await;
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_content(
    bot: &Bot,
    shared: &Arc<Shared>,
    chat_id: i64,
    parts: &[String],
    tool_use_id: Option<&str>,
    content_type: ContentType,
    window_name: &str,
    thread_id: Option<i32>,
    queue_rest_empty: bool,
) -> Result<(), Duration> {
    let tid0 = thread_id.unwrap_or(0);

    // 1. A tool_result edits the previously sent tool_use message.
    if content_type == ContentType::ToolResult {
        if let Some(id) = tool_use_id {
            let key = (id.to_string(), chat_id, tid0);
            let target = shared.tool_msgs.get(&key).map(|e| *e.value());
            if let Some(message_id) = target {
                clear_status_message(bot, shared, chat_id, tid0).await;
                let full_text = parts.join("\n\n");
                let edited = edit_message(bot, chat_id, message_id, &full_text, None).await?;
                shared.tool_msgs.remove(&key);
                if edited {
                    check_and_send_status(
                        bot,
                        shared,
                        chat_id,
                        window_name,
                        thread_id,
                        queue_rest_empty,
                    )
                    .await?;
                    return Ok(());
                }
                debug!(chat = chat_id, message = message_id.0, "tool edit failed, sending as new");
            }
        }
    }

    // 2. Send in order; the first unit may repurpose the status message.
    // Merged parts whose joined body still fits the merge budget go out
    // as one message; anything larger (a paginated long text) keeps its
    // per-part sends.
    let joined_len: usize =
        parts.iter().map(String::len).sum::<usize>() + 2 * parts.len().saturating_sub(1);
    let send_units: Vec<String> = if parts.len() > 1 && joined_len <= MERGE_MAX_LENGTH {
        vec![parts.join("\n\n")]
    } else {
        parts.to_vec()
    };

    let mut last_message_id = None;
    for (i, unit) in send_units.iter().enumerate() {
        if i == 0 {
            if let Some(converted) =
                convert_status_to_content(bot, shared, chat_id, tid0, window_name, unit).await?
            {
                last_message_id = Some(converted);
                continue;
            }
        }
        if let Some(sent) = send_message(bot, shared, chat_id, thread_id, unit, None).await? {
            last_message_id = Some(sent.id);
        }
    }

    // 3. Remember the tool_use message so its result can edit it.
    if content_type == ContentType::ToolUse {
        if let (Some(id), Some(message_id)) = (tool_use_id, last_message_id) {
            shared
                .tool_msgs
                .insert((id.to_string(), chat_id, tid0), message_id);
        }
    }

    // 4. Status trails content.
    check_and_send_status(bot, shared, chat_id, window_name, thread_id, queue_rest_empty).await
}

/// Repurpose the recipient's status message as the first content part by
/// editing it in place — cheaper and less noisy than delete + send.
///
/// Returns the message id when the conversion succeeded.
async fn convert_status_to_content(
    bot: &Bot,
    shared: &Arc<Shared>,
    chat_id: i64,
    tid0: i32,
    window_name: &str,
    content_text: &str,
) -> Result<Option<teloxide::types::MessageId>, Duration> {
    let Some((_, info)) = shared.status_msgs.remove(&(chat_id, tid0)) else {
        return Ok(None);
    };

    if info.window_name != window_name {
        // Status belongs to another window; never show its text there.
        delete_message(bot, chat_id, info.message_id).await;
        return Ok(None);
    }

    if edit_message(bot, chat_id, info.message_id, content_text, None).await? {
        Ok(Some(info.message_id))
    } else {
        Ok(None)
    }
}

async fn process_status_update(
    bot: &Bot,
    shared: &Arc<Shared>,
    chat_id: i64,
    text: &str,
    window_name: &str,
    thread_id: Option<i32>,
) -> Result<(), Duration> {
    let tid0 = thread_id.unwrap_or(0);
    let skey = (chat_id, tid0);

    if text.is_empty() {
        clear_status_message(bot, shared, chat_id, tid0).await;
        return Ok(());
    }

    // A working assistant is interruptible; mirror that as typing.
    if text.to_lowercase().contains("esc to interrupt") {
        let mut action = bot.send_chat_action(ChatId(chat_id), ChatAction::Typing);
        if let Some(thread) = thread_of(thread_id) {
            action = action.message_thread_id(thread);
        }
        let _ = action.await;
    }

    let current = shared.status_msgs.get(&skey).map(|e| e.value().clone());
    match current {
        None => send_status_message(bot, shared, chat_id, tid0, window_name, text, thread_id).await,
        Some(info) if info.window_name != window_name => {
            clear_status_message(bot, shared, chat_id, tid0).await;
            send_status_message(bot, shared, chat_id, tid0, window_name, text, thread_id).await
        }
        Some(info) if info.last_text == text => Ok(()),
        Some(info) => {
            if edit_message(bot, chat_id, info.message_id, text, None).await? {
                shared.status_msgs.insert(
                    skey,
                    StatusMsgInfo {
                        message_id: info.message_id,
                        window_name: window_name.to_string(),
                        last_text: text.to_string(),
                    },
                );
                Ok(())
            } else {
                shared.status_msgs.remove(&skey);
                send_status_message(bot, shared, chat_id, tid0, window_name, text, thread_id).await
            }
        }
    }
}

async fn send_status_message(
    bot: &Bot,
    shared: &Arc<Shared>,
    chat_id: i64,
    tid0: i32,
    window_name: &str,
    text: &str,
    thread_id: Option<i32>,
) -> Result<(), Duration> {
    if let Some(sent) = send_message(bot, shared, chat_id, thread_id, text, None).await? {
        shared.status_msgs.insert(
            (chat_id, tid0),
            StatusMsgInfo {
                message_id: sent.id,
                window_name: window_name.to_string(),
                last_text: text.to_string(),
            },
        );
    }
    Ok(())
}

/// Delete the recipient's tracked status message, if any.
pub async fn clear_status_message(bot: &Bot, shared: &Arc<Shared>, chat_id: i64, tid0: i32) {
    if let Some((_, info)) = shared.status_msgs.remove(&(chat_id, tid0)) {
        delete_message(bot, chat_id, info.message_id).await;
    }
}

/// After content lands, surface the terminal's current status line —
/// but only when this queue has nothing else pending, so a status edit
/// never races a content task for the same message.
async fn check_and_send_status(
    bot: &Bot,
    shared: &Arc<Shared>,
    chat_id: i64,
    window_name: &str,
    thread_id: Option<i32>,
    queue_rest_empty: bool,
) -> Result<(), Duration> {
    if !queue_rest_empty {
        return Ok(());
    }
    let Some(window) = shared.mux.find_window(window_name).await else {
        return Ok(());
    };
    let Some(pane_text) = shared.mux.capture_pane(&window.window_id, false).await else {
        return Ok(());
    };
    let Some(status_line) = parse_status_line(&pane_text) else {
        return Ok(());
    };
    send_status_message(
        bot,
        shared,
        chat_id,
        thread_id.unwrap_or(0),
        window_name,
        &status_line,
        thread_id,
    )
    .await
}

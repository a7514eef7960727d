//! Rate-limited Telegram send/edit helpers with MarkdownV2 fallback.
//!
//! Every outbound path goes through these: convert to MarkdownV2 first,
//! fall back to plain text when Telegram rejects the parse mode, and
//! surface flood-control waits to the caller so the delivery queue can
//! sleep and retry the same task.

use std::sync::Arc;
use std::time::{Duration, Instant};

use teloxide::prelude::*;
use teloxide::types::{
    InlineKeyboardMarkup, LinkPreviewOptions, Message, MessageId, ParseMode, ThreadId,
};
use teloxide::RequestError;
use tracing::{debug, warn};

use muxbot_core::config::MESSAGE_SEND_INTERVAL_SECS;

use crate::markdown::convert_markdown;
use crate::state::Shared;

/// Link previews add visual noise; disabled on every message.
pub fn no_link_preview() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

pub fn thread_of(thread_id: Option<i32>) -> Option<ThreadId> {
    thread_id.map(|t| ThreadId(MessageId(t)))
}

/// Extract the flood-control wait from a request error.
pub fn flood_wait(err: &RequestError) -> Option<Duration> {
    match err {
        RequestError::RetryAfter(secs) => Some(secs.duration()),
        _ => None,
    }
}

/// Sleep as needed to keep ≥ MESSAGE_SEND_INTERVAL between sends to the
/// same chat, then stamp the send time.
pub async fn rate_limit(shared: &Shared, chat_id: i64) {
    let interval = Duration::from_secs_f64(MESSAGE_SEND_INTERVAL_SECS);
    let wait = shared.last_send.get(&chat_id).and_then(|last| {
        let elapsed = last.elapsed();
        (elapsed < interval).then(|| interval - elapsed)
    });
    if let Some(wait) = wait {
        debug!(chat = chat_id, ?wait, "rate limiting send");
        tokio::time::sleep(wait).await;
    }
    shared.last_send.insert(chat_id, Instant::now());
}

/// Rate-limited send with MarkdownV2 → plain-text fallback.
///
/// `Err(wait)` is a flood-control signal the caller must honor; any other
/// failure is logged and reported as `Ok(None)` so the pipeline moves on.
pub async fn send_message(
    bot: &Bot,
    shared: &Arc<Shared>,
    chat_id: i64,
    thread_id: Option<i32>,
    text: &str,
    keyboard: Option<InlineKeyboardMarkup>,
) -> Result<Option<Message>, Duration> {
    rate_limit(shared, chat_id).await;

    let mut request = bot
        .send_message(ChatId(chat_id), convert_markdown(text))
        .parse_mode(ParseMode::MarkdownV2)
        .link_preview_options(no_link_preview());
    if let Some(thread) = thread_of(thread_id) {
        request = request.message_thread_id(thread);
    }
    if let Some(kb) = keyboard.clone() {
        request = request.reply_markup(kb);
    }

    match request.await {
        Ok(message) => return Ok(Some(message)),
        Err(e) => {
            if let Some(wait) = flood_wait(&e) {
                return Err(wait);
            }
            debug!(chat = chat_id, error = %e, "MarkdownV2 send rejected, retrying plain");
        }
    }

    let mut request = bot
        .send_message(ChatId(chat_id), text)
        .link_preview_options(no_link_preview());
    if let Some(thread) = thread_of(thread_id) {
        request = request.message_thread_id(thread);
    }
    if let Some(kb) = keyboard {
        request = request.reply_markup(kb);
    }

    match request.await {
        Ok(message) => Ok(Some(message)),
        Err(e) => {
            if let Some(wait) = flood_wait(&e) {
                return Err(wait);
            }
            warn!(chat = chat_id, error = %e, "failed to send message");
            Ok(None)
        }
    }
}

/// Edit with MarkdownV2 → plain-text fallback. `Ok(false)` means both
/// attempts failed (message deleted, too old, unchanged, …).
pub async fn edit_message(
    bot: &Bot,
    chat_id: i64,
    message_id: MessageId,
    text: &str,
    keyboard: Option<InlineKeyboardMarkup>,
) -> Result<bool, Duration> {
    let mut request = bot
        .edit_message_text(ChatId(chat_id), message_id, convert_markdown(text))
        .parse_mode(ParseMode::MarkdownV2)
        .link_preview_options(no_link_preview());
    if let Some(kb) = keyboard.clone() {
        request = request.reply_markup(kb);
    }

    match request.await {
        Ok(_) => return Ok(true),
        Err(e) => {
            if let Some(wait) = flood_wait(&e) {
                return Err(wait);
            }
            debug!(chat = chat_id, error = %e, "MarkdownV2 edit rejected, retrying plain");
        }
    }

    let mut request = bot
        .edit_message_text(ChatId(chat_id), message_id, text)
        .link_preview_options(no_link_preview());
    if let Some(kb) = keyboard {
        request = request.reply_markup(kb);
    }

    match request.await {
        Ok(_) => Ok(true),
        Err(e) => {
            if let Some(wait) = flood_wait(&e) {
                return Err(wait);
            }
            debug!(chat = chat_id, message = message_id.0, error = %e, "edit failed");
            Ok(false)
        }
    }
}

/// Best-effort delete; the message may already be gone.
pub async fn delete_message(bot: &Bot, chat_id: i64, message_id: MessageId) {
    if let Err(e) = bot.delete_message(ChatId(chat_id), message_id).await {
        debug!(chat = chat_id, message = message_id.0, error = %e, "delete failed");
    }
}

/// Reply helper for user-triggered handlers: markdown with plain
/// fallback, flood waits absorbed (the dispatcher has no retry loop).
pub async fn reply(bot: &Bot, msg: &Message, text: &str) {
    let mut request = bot
        .send_message(msg.chat.id, convert_markdown(text))
        .parse_mode(ParseMode::MarkdownV2)
        .link_preview_options(no_link_preview());
    if let Some(thread) = msg.thread_id {
        request = request.message_thread_id(thread);
    }
    if request.await.is_ok() {
        return;
    }

    let mut request = bot
        .send_message(msg.chat.id, text)
        .link_preview_options(no_link_preview());
    if let Some(thread) = msg.thread_id {
        request = request.message_thread_id(thread);
    }
    if let Err(e) = request.await {
        warn!(chat = msg.chat.id.0, error = %e, "failed to reply");
    }
}

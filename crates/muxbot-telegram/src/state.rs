//! Shared bot state threaded through handlers, queue workers, and the
//! pollers. One value owns every in-memory registry — no globals.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use teloxide::types::MessageId;

use muxbot_core::MuxbotConfig;
use muxbot_mux::MuxBackend;
use muxbot_sessions::SessionStore;

use crate::queue::QueueHub;

/// Registry keys: `(chat_id, thread_id_or_0)` — the main topic maps to 0.
pub type TopicKey = (i64, i32);

/// Tracked status message for a recipient.
#[derive(Debug, Clone)]
pub struct StatusMsgInfo {
    pub message_id: MessageId,
    pub window_name: String,
    pub last_text: String,
}

/// Directory-selection flow state, per chat.
#[derive(Debug, Clone, Default)]
pub struct BrowseState {
    pub mode: BrowseMode,
    pub path: PathBuf,
    pub page: usize,
    /// Subdirs of `path`, cached so callbacks can use indices instead of
    /// names (64-byte callback-data limit).
    pub dirs: Vec<String>,
    pub pending_thread: Option<i32>,
    pub pending_text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrowseMode {
    #[default]
    Idle,
    AwaitingPath,
    Browsing,
}

pub struct Shared {
    pub config: MuxbotConfig,
    pub store: Arc<SessionStore>,
    pub mux: Arc<dyn MuxBackend>,
    pub queues: QueueHub,

    /// (tool_use_id, chat, thread) → message id of the sent tool_use
    /// message, so a later tool_result can edit it in place.
    pub tool_msgs: DashMap<(String, i64, i32), MessageId>,
    /// Status message tracking per recipient.
    pub status_msgs: DashMap<TopicKey, StatusMsgInfo>,
    /// Interactive UI message per recipient.
    pub interactive_msgs: DashMap<TopicKey, MessageId>,
    /// Interactive mode per recipient: which window owns the UI.
    pub interactive_mode: DashMap<TopicKey, String>,
    /// Directory-browser state per chat.
    pub browse: DashMap<i64, BrowseState>,
    /// Last outbound send per chat, for flood-control pacing.
    pub last_send: DashMap<i64, Instant>,
}

impl Shared {
    pub fn new(config: MuxbotConfig, store: Arc<SessionStore>, mux: Arc<dyn MuxBackend>) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            mux,
            queues: QueueHub::new(),
            tool_msgs: DashMap::new(),
            status_msgs: DashMap::new(),
            interactive_msgs: DashMap::new(),
            interactive_mode: DashMap::new(),
            browse: DashMap::new(),
            last_send: DashMap::new(),
        })
    }

    pub fn topic_key(chat_id: i64, thread_id: Option<i32>) -> TopicKey {
        (chat_id, thread_id.unwrap_or(0))
    }
}

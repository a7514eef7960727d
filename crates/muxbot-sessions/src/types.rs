//! Data types persisted or surfaced by the session store.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Persistent state for a multiplexer window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowState {
    /// Associated assistant session id; empty until the first
    /// SessionStart hook entry lands.
    #[serde(default)]
    pub session_id: String,
    /// Working directory, used for direct transcript path construction.
    #[serde(default)]
    pub cwd: String,
}

/// A resolved assistant session behind a window.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: String,
    pub summary: String,
    pub message_count: usize,
    pub file_path: PathBuf,
}

impl SessionHandle {
    pub fn short_summary(&self) -> String {
        if self.summary.chars().count() > 30 {
            let head: String = self.summary.chars().take(27).collect();
            format!("{head}...")
        } else {
            self.summary.clone()
        }
    }
}

/// Unread window info for a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnreadInfo {
    pub has_unread: bool,
    /// The chat's last read offset.
    pub start_offset: u64,
    /// Current transcript file size.
    pub end_offset: u64,
}

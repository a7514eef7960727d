//! Byte-offset persistence for tracked transcript files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use muxbot_core::persist::{atomic_write_json, load_json_or_default};

/// One transcript file under incremental tailing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedSession {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub file_path: String,
    /// Bytes up to here have already been read and emitted.
    #[serde(default)]
    pub last_byte_offset: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedMonitorState {
    #[serde(default)]
    tracked_sessions: HashMap<String, TrackedSession>,
}

/// In-memory monitor state with dirty-flagged atomic JSON persistence.
#[derive(Debug)]
pub struct MonitorState {
    state_file: PathBuf,
    pub tracked_sessions: HashMap<String, TrackedSession>,
    dirty: bool,
}

impl MonitorState {
    pub fn new(state_file: &Path) -> Self {
        Self {
            state_file: state_file.to_path_buf(),
            tracked_sessions: HashMap::new(),
            dirty: false,
        }
    }

    /// Load from disk; missing or corrupt files leave the state empty.
    pub fn load(&mut self) {
        let persisted: PersistedMonitorState = load_json_or_default(&self.state_file);
        self.tracked_sessions = persisted.tracked_sessions;
        self.dirty = false;
    }

    pub fn get_session(&self, session_id: &str) -> Option<&TrackedSession> {
        self.tracked_sessions.get(session_id)
    }

    pub fn update_session(&mut self, session: TrackedSession) {
        self.tracked_sessions
            .insert(session.session_id.clone(), session);
        self.dirty = true;
    }

    pub fn remove_session(&mut self, session_id: &str) {
        if self.tracked_sessions.remove(session_id).is_some() {
            self.dirty = true;
        }
    }

    pub fn save(&mut self) {
        let persisted = PersistedMonitorState {
            tracked_sessions: self.tracked_sessions.clone(),
        };
        if let Err(e) = atomic_write_json(&self.state_file, &persisted) {
            warn!(error = %e, "failed to save monitor state");
            return;
        }
        self.dirty = false;
    }

    pub fn save_if_dirty(&mut self) {
        if self.dirty {
            self.save();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = MonitorState::new(&dir.path().join("state.json"));
        state.update_session(TrackedSession {
            session_id: "sid1".into(),
            file_path: "/path.jsonl".into(),
            last_byte_offset: 100,
        });
        let got = state.get_session("sid1").unwrap();
        assert_eq!(got.last_byte_offset, 100);
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = MonitorState::new(&dir.path().join("state.json"));
        state.update_session(TrackedSession {
            session_id: "sid1".into(),
            ..Default::default()
        });
        state.remove_session("sid1");
        assert!(state.get_session("sid1").is_none());
        state.remove_session("does-not-exist");
    }

    #[test]
    fn dirty_flag_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = MonitorState::new(&dir.path().join("state.json"));
        assert!(!state.is_dirty());
        state.update_session(TrackedSession {
            session_id: "sid1".into(),
            ..Default::default()
        });
        assert!(state.is_dirty());
        state.save();
        assert!(!state.is_dirty());
    }

    #[test]
    fn save_if_dirty_skips_when_clean() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = MonitorState::new(&path);
        state.save_if_dirty();
        assert!(!path.exists());
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        {
            let mut state = MonitorState::new(&path);
            state.update_session(TrackedSession {
                session_id: "sid1".into(),
                file_path: "/path.jsonl".into(),
                last_byte_offset: 42,
            });
            state.save();
        }
        let mut reloaded = MonitorState::new(&path);
        reloaded.load();
        assert_eq!(reloaded.get_session("sid1").unwrap().last_byte_offset, 42);
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not valid json{{{").unwrap();
        let mut state = MonitorState::new(&path);
        state.load();
        assert!(state.tracked_sessions.is_empty());
    }
}

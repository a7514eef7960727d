//! The session store: in-memory authoritative maps with write-through
//! atomic JSON persistence.
//!
//! Three maps are persisted to `state.json` on every mutation:
//!   window_states       — window_name → {session_id, cwd}
//!   user_window_offsets — chat_id → window_name → byte offset
//!   thread_bindings     — chat_id → thread_id → window_name
//!
//! A reverse index (chat_id, window_name) → thread_id is rebuilt on load
//! and kept in lockstep with the forward bindings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use muxbot_core::persist::{atomic_write_json, load_json_or_default};

use crate::types::{SessionHandle, UnreadInfo, WindowState};

/// On-disk layout of `state.json`. Chat and thread ids are serialized as
/// string keys.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    window_states: HashMap<String, WindowState>,
    #[serde(default)]
    user_window_offsets: HashMap<String, HashMap<String, u64>>,
    #[serde(default)]
    thread_bindings: HashMap<String, HashMap<String, String>>,
}

#[derive(Debug, Default)]
struct StoreInner {
    window_states: HashMap<String, WindowState>,
    user_window_offsets: HashMap<i64, HashMap<String, u64>>,
    thread_bindings: HashMap<i64, HashMap<i32, String>>,
    /// (chat_id, window_name) → thread_id, for O(1) inbound routing.
    window_to_thread: HashMap<(i64, String), i32>,
}

impl StoreInner {
    fn rebuild_reverse_index(&mut self) {
        self.window_to_thread.clear();
        for (chat, bindings) in &self.thread_bindings {
            for (thread, window) in bindings {
                self.window_to_thread.insert((*chat, window.clone()), *thread);
            }
        }
    }

    fn to_persisted(&self) -> PersistedState {
        PersistedState {
            window_states: self.window_states.clone(),
            user_window_offsets: self
                .user_window_offsets
                .iter()
                .map(|(chat, offsets)| (chat.to_string(), offsets.clone()))
                .collect(),
            thread_bindings: self
                .thread_bindings
                .iter()
                .map(|(chat, bindings)| {
                    (
                        chat.to_string(),
                        bindings
                            .iter()
                            .map(|(thread, window)| (thread.to_string(), window.clone()))
                            .collect(),
                    )
                })
                .collect(),
        }
    }

    fn from_persisted(state: PersistedState) -> Self {
        let mut inner = StoreInner {
            window_states: state.window_states,
            user_window_offsets: state
                .user_window_offsets
                .into_iter()
                .filter_map(|(chat, offsets)| Some((chat.parse().ok()?, offsets)))
                .collect(),
            thread_bindings: state
                .thread_bindings
                .into_iter()
                .filter_map(|(chat, bindings)| {
                    let chat: i64 = chat.parse().ok()?;
                    let bindings = bindings
                        .into_iter()
                        .filter_map(|(thread, window)| Some((thread.parse().ok()?, window)))
                        .collect();
                    Some((chat, bindings))
                })
                .collect(),
            window_to_thread: HashMap::new(),
        };
        inner.rebuild_reverse_index();
        inner
    }
}

pub struct SessionStore {
    inner: Mutex<StoreInner>,
    state_file: PathBuf,
    session_map_file: PathBuf,
    mux_session_name: String,
    projects_path: PathBuf,
}

impl SessionStore {
    /// Load state synchronously; missing or malformed files start empty.
    pub fn new(
        state_file: &Path,
        session_map_file: &Path,
        mux_session_name: &str,
        projects_path: &Path,
    ) -> Self {
        let persisted: PersistedState = load_json_or_default(state_file);
        Self {
            inner: Mutex::new(StoreInner::from_persisted(persisted)),
            state_file: state_file.to_path_buf(),
            session_map_file: session_map_file.to_path_buf(),
            mux_session_name: mux_session_name.to_string(),
            projects_path: projects_path.to_path_buf(),
        }
    }

    fn save(&self, inner: &StoreInner) {
        if let Err(e) = atomic_write_json(&self.state_file, &inner.to_persisted()) {
            warn!(error = %e, "failed to save session state");
        } else {
            debug!(path = %self.state_file.display(), "state saved");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        // Lock poisoning would mean a panicked mutator; state is still
        // structurally valid JSON maps, so recover the guard.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ── Thread bindings ──────────────────────────────────────────────

    /// Bind a topic thread to a window.
    pub fn bind(&self, chat_id: i64, thread_id: i32, window_name: &str) {
        let mut inner = self.lock();

        // A window holds at most one topic per chat; stale duplicates are
        // dropped rather than corrupting the reverse index.
        if let Some(old_thread) = inner
            .window_to_thread
            .get(&(chat_id, window_name.to_string()))
            .copied()
        {
            if old_thread != thread_id {
                warn!(
                    chat = chat_id,
                    window = window_name,
                    old_thread,
                    new_thread = thread_id,
                    "window already bound to another topic, replacing"
                );
                if let Some(bindings) = inner.thread_bindings.get_mut(&chat_id) {
                    bindings.remove(&old_thread);
                }
            }
        }

        inner
            .thread_bindings
            .entry(chat_id)
            .or_default()
            .insert(thread_id, window_name.to_string());
        inner
            .window_to_thread
            .insert((chat_id, window_name.to_string()), thread_id);
        self.save(&inner);
        info!(chat = chat_id, thread = thread_id, window = window_name, "bound thread");
    }

    /// Remove a binding, returning the window it pointed at.
    pub fn unbind(&self, chat_id: i64, thread_id: i32) -> Option<String> {
        let mut inner = self.lock();
        let bindings = inner.thread_bindings.get_mut(&chat_id)?;
        let window_name = bindings.remove(&thread_id)?;
        if bindings.is_empty() {
            inner.thread_bindings.remove(&chat_id);
        }
        inner.window_to_thread.remove(&(chat_id, window_name.clone()));
        self.save(&inner);
        info!(chat = chat_id, thread = thread_id, window = %window_name, "unbound thread");
        Some(window_name)
    }

    pub fn window_for_thread(&self, chat_id: i64, thread_id: i32) -> Option<String> {
        self.lock()
            .thread_bindings
            .get(&chat_id)?
            .get(&thread_id)
            .cloned()
    }

    /// Reverse lookup via the O(1) index.
    pub fn thread_for_window(&self, chat_id: i64, window_name: &str) -> Option<i32> {
        self.lock()
            .window_to_thread
            .get(&(chat_id, window_name.to_string()))
            .copied()
    }

    /// Snapshot of all bindings as (chat_id, thread_id, window_name).
    pub fn iter_bindings(&self) -> Vec<(i64, i32, String)> {
        let inner = self.lock();
        let mut out = Vec::new();
        for (chat, bindings) in &inner.thread_bindings {
            for (thread, window) in bindings {
                out.push((*chat, *thread, window.clone()));
            }
        }
        out
    }

    // ── Window states ────────────────────────────────────────────────

    pub fn window_state(&self, window_name: &str) -> WindowState {
        self.lock()
            .window_states
            .get(window_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Zero the session id after a user-issued `/clear`, so the next
    /// hook entry is treated as a brand-new session.
    pub fn clear_window_session(&self, window_name: &str) {
        let mut inner = self.lock();
        inner
            .window_states
            .entry(window_name.to_string())
            .or_default()
            .session_id
            .clear();
        self.save(&inner);
        info!(window = window_name, "cleared window session");
    }

    // ── Read offsets ─────────────────────────────────────────────────

    pub fn read_offset(&self, chat_id: i64, window_name: &str) -> Option<u64> {
        self.lock()
            .user_window_offsets
            .get(&chat_id)?
            .get(window_name)
            .copied()
    }

    pub fn update_read_offset(&self, chat_id: i64, window_name: &str, offset: u64) {
        let mut inner = self.lock();
        inner
            .user_window_offsets
            .entry(chat_id)
            .or_default()
            .insert(window_name.to_string(), offset);
        self.save(&inner);
    }

    /// Unread info for a chat's window; `None` when the session or its
    /// transcript cannot be resolved.
    ///
    /// A first-time view initializes the offset to the current file size
    /// so no backlog is delivered.
    pub async fn unread_info(&self, chat_id: i64, window_name: &str) -> Option<UnreadInfo> {
        let session = self.resolve_session_for_window(window_name).await?;
        let file_size = tokio::fs::metadata(&session.file_path).await.ok()?.len();

        let offset = match self.read_offset(chat_id, window_name) {
            Some(offset) => offset,
            None => {
                self.update_read_offset(chat_id, window_name, file_size);
                return Some(UnreadInfo {
                    has_unread: false,
                    start_offset: file_size,
                    end_offset: file_size,
                });
            }
        };

        // A shrunken file means truncation (e.g. after /clear): everything
        // is unread again.
        let offset = if offset > file_size { 0 } else { offset };
        Some(UnreadInfo {
            has_unread: offset < file_size,
            start_offset: offset,
            end_offset: file_size,
        })
    }

    // ── Session-map ingestion ────────────────────────────────────────

    /// Entries of `session_map.json` for our multiplexer session, as
    /// window_name → (session_id, cwd). `None` when the file is missing
    /// or unreadable — distinct from an empty map, which is trusted.
    async fn read_session_map(&self) -> Option<HashMap<String, (String, String)>> {
        let content = tokio::fs::read_to_string(&self.session_map_file).await.ok()?;
        let map = serde_json::from_str::<HashMap<String, Value>>(&content).ok()?;

        let prefix = format!("{}:", self.mux_session_name);
        let mut out = HashMap::new();
        for (key, info) in map {
            let Some(window_name) = key.strip_prefix(&prefix) else {
                continue;
            };
            let session_id = info
                .get("session_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let cwd = info
                .get("cwd")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            out.insert(window_name.to_string(), (session_id, cwd));
        }
        Some(out)
    }

    /// Re-read `session_map.json` (written by the SessionStart hook) and
    /// fold new window↔session associations into the window states.
    /// States for windows absent from the map are garbage-collected.
    pub async fn load_session_map(&self) -> bool {
        let Some(map) = self.read_session_map().await else {
            return false;
        };

        let mut inner = self.lock();
        let mut changed = false;

        for (window_name, (session_id, cwd)) in &map {
            if session_id.is_empty() {
                continue;
            }
            let state = inner
                .window_states
                .entry(window_name.clone())
                .or_default();
            if &state.session_id != session_id || &state.cwd != cwd {
                info!(window = %window_name, session = %session_id, cwd = %cwd, "session map updated window");
                state.session_id = session_id.clone();
                state.cwd = cwd.clone();
                changed = true;
            }
        }

        let stale: Vec<String> = inner
            .window_states
            .keys()
            .filter(|w| !w.is_empty() && !map.contains_key(*w))
            .cloned()
            .collect();
        for window_name in stale {
            info!(window = %window_name, "removing stale window state");
            inner.window_states.remove(&window_name);
            changed = true;
        }

        if changed {
            self.save(&inner);
        }
        changed
    }

    /// Current session-map view as window_name → session_id, for the
    /// transcript monitor's reconciliation pass.
    pub async fn session_map_windows(&self) -> HashMap<String, String> {
        self.read_session_map()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|(_, (session_id, _))| !session_id.is_empty())
            .map(|(window, (session_id, _))| (window, session_id))
            .collect()
    }

    /// Poll the session map until a *new* session id appears for
    /// `window_name` (anything different from `exclude_session_id`).
    ///
    /// Returns false on timeout; that is not an error — the caller binds
    /// anyway and the monitor picks the session up later.
    pub async fn wait_for_session_map_entry(
        &self,
        window_name: &str,
        exclude_session_id: Option<&str>,
        timeout: Duration,
    ) -> bool {
        let interval = Duration::from_millis(500);
        let deadline = tokio::time::Instant::now() + timeout;
        debug!(window = window_name, ?timeout, "waiting for session map entry");

        while tokio::time::Instant::now() < deadline {
            let map = self.read_session_map().await.unwrap_or_default();
            if let Some((session_id, _)) = map.get(window_name) {
                let is_new = !session_id.is_empty()
                    && exclude_session_id.map_or(true, |old| old != session_id);
                if is_new {
                    debug!(window = window_name, session = %session_id, "session map entry found");
                    self.load_session_map().await;
                    return true;
                }
            }
            tokio::time::sleep(interval).await;
        }
        warn!(window = window_name, "timed out waiting for session map entry");
        false
    }

    // ── Window → session resolution ──────────────────────────────────

    /// Direct transcript path: `<root>/<cwd with '/'→'-'>/<sid>.jsonl`.
    pub fn build_session_file_path(&self, session_id: &str, cwd: &str) -> Option<PathBuf> {
        if session_id.is_empty() || cwd.is_empty() {
            return None;
        }
        let encoded = cwd.replace('/', "-");
        Some(self.projects_path.join(encoded).join(format!("{session_id}.jsonl")))
    }

    /// Locate the transcript file, falling back to a scan of all project
    /// directories for `<sid>.jsonl` when the cwd encoding mismatches.
    async fn locate_session_file(&self, session_id: &str, cwd: &str) -> Option<PathBuf> {
        if let Some(path) = self.build_session_file_path(session_id, cwd) {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Some(path);
            }
        }

        let mut dirs = tokio::fs::read_dir(&self.projects_path).await.ok()?;
        while let Ok(Some(entry)) = dirs.next_entry().await {
            let candidate = entry.path().join(format!("{session_id}.jsonl"));
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                debug!(path = %candidate.display(), "found session via scan");
                return Some(candidate);
            }
        }
        None
    }

    /// Resolve a window to its assistant session.
    ///
    /// A vanished transcript clears the window state so later lookups
    /// report "no session" instead of retrying a dead path.
    pub async fn resolve_session_for_window(&self, window_name: &str) -> Option<SessionHandle> {
        let state = self.window_state(window_name);
        if state.session_id.is_empty() || state.cwd.is_empty() {
            return None;
        }

        let Some(file_path) = self.locate_session_file(&state.session_id, &state.cwd).await
        else {
            warn!(
                window = window_name,
                session = %state.session_id,
                "session file no longer exists, clearing state"
            );
            let mut inner = self.lock();
            if let Some(ws) = inner.window_states.get_mut(window_name) {
                ws.session_id.clear();
                ws.cwd.clear();
            }
            self.save(&inner);
            return None;
        };

        // Single pass: summary record wins, the last user message is the
        // fallback title.
        let content = tokio::fs::read_to_string(&file_path).await.ok()?;
        let mut summary = String::new();
        let mut last_user_msg = String::new();
        let mut message_count = 0;
        for line in content.lines() {
            let Some(record) = muxbot_transcript::parse_line(line) else {
                continue;
            };
            message_count += 1;
            if record.get("type").and_then(Value::as_str) == Some("summary") {
                if let Some(s) = record.get("summary").and_then(Value::as_str) {
                    if !s.is_empty() {
                        summary = s.to_string();
                    }
                }
            } else if let Some(text) = muxbot_transcript::user_text(&record) {
                last_user_msg = text;
            }
        }

        if summary.is_empty() {
            summary = if last_user_msg.is_empty() {
                "Untitled".to_string()
            } else {
                last_user_msg.chars().take(50).collect()
            };
        }

        Some(SessionHandle {
            session_id: state.session_id,
            summary,
            message_count,
            file_path,
        })
    }

    /// All `(chat_id, window_name, thread_id)` whose bound window
    /// resolves to `session_id`.
    pub async fn find_recipients_for_session(
        &self,
        session_id: &str,
    ) -> Vec<(i64, String, i32)> {
        let mut out = Vec::new();
        for (chat_id, thread_id, window_name) in self.iter_bindings() {
            if let Some(session) = self.resolve_session_for_window(&window_name).await {
                if session.session_id == session_id {
                    out.push((chat_id, window_name, thread_id));
                }
            }
        }
        out
    }

    // ── Message history ──────────────────────────────────────────────

    /// Parsed events for a window's session, optionally restricted to a
    /// byte range, in one-shot parse mode.
    pub async fn recent_messages(
        &self,
        window_name: &str,
        start_byte: u64,
        end_byte: Option<u64>,
    ) -> Vec<muxbot_transcript::ParsedEvent> {
        let Some(session) = self.resolve_session_for_window(window_name).await else {
            return Vec::new();
        };
        let Ok(bytes) = tokio::fs::read(&session.file_path).await else {
            return Vec::new();
        };

        let start = (start_byte as usize).min(bytes.len());
        let end = end_byte
            .map(|e| (e as usize).min(bytes.len()))
            .unwrap_or(bytes.len());
        if start >= end {
            return Vec::new();
        }

        let slice = String::from_utf8_lossy(&bytes[start..end]);
        let records: Vec<Value> = slice
            .lines()
            .filter_map(muxbot_transcript::parse_line)
            .collect();
        let (events, _) = muxbot_transcript::parse_entries(&records, None);
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_at(dir: &Path) -> SessionStore {
        SessionStore::new(
            &dir.join("state.json"),
            &dir.join("session_map.json"),
            "muxbot",
            &dir.join("projects"),
        )
    }

    #[test]
    fn bind_unbind_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path());

        store.bind(100, 42, "proj");
        assert_eq!(store.window_for_thread(100, 42).as_deref(), Some("proj"));
        assert_eq!(store.thread_for_window(100, "proj"), Some(42));

        let removed = store.unbind(100, 42);
        assert_eq!(removed.as_deref(), Some("proj"));
        assert_eq!(store.window_for_thread(100, 42), None);
        assert_eq!(store.thread_for_window(100, "proj"), None);
    }

    #[test]
    fn forward_and_reverse_maps_agree_over_random_ops() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path());

        // Deterministic pseudo-random bind/unbind churn.
        let mut seed: u64 = 0x9e3779b9;
        for step in 0..200u64 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let chat = 100 + (seed % 3) as i64;
            let thread = 1 + ((seed >> 8) % 5) as i32;
            let window = format!("w{}", (seed >> 16) % 4);
            if step % 3 == 0 {
                store.unbind(chat, thread);
            } else {
                store.bind(chat, thread, &window);
            }

            for (c, t, w) in store.iter_bindings() {
                assert_eq!(store.thread_for_window(c, &w), Some(t));
                assert_eq!(store.window_for_thread(c, t).as_deref(), Some(w.as_str()));
            }
        }
    }

    #[test]
    fn one_topic_per_window_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path());

        store.bind(100, 42, "proj");
        store.bind(100, 43, "proj");
        // The old binding is replaced, not duplicated.
        assert_eq!(store.thread_for_window(100, "proj"), Some(43));
        assert_eq!(store.window_for_thread(100, 42), None);
        assert_eq!(store.iter_bindings().len(), 1);
    }

    #[test]
    fn save_load_identity() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = store_at(dir.path());
            store.bind(100, 42, "proj");
            store.bind(-100500, 7, "other");
            store.update_read_offset(100, "proj", 1234);
            store.clear_window_session("proj");
        }

        let reloaded = store_at(dir.path());
        assert_eq!(reloaded.window_for_thread(100, 42).as_deref(), Some("proj"));
        assert_eq!(reloaded.window_for_thread(-100500, 7).as_deref(), Some("other"));
        assert_eq!(reloaded.thread_for_window(100, "proj"), Some(42));
        assert_eq!(reloaded.read_offset(100, "proj"), Some(1234));
        assert_eq!(reloaded.window_state("proj").session_id, "");
    }

    #[test]
    fn malformed_state_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("state.json"), "{broken json").unwrap();
        let store = store_at(dir.path());
        assert!(store.iter_bindings().is_empty());
    }

    #[test]
    fn persisted_format_matches_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path());
        store.bind(100, 42, "proj");
        store.update_read_offset(100, "proj", 7);

        let raw = std::fs::read_to_string(dir.path().join("state.json")).unwrap();
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["thread_bindings"]["100"]["42"], "proj");
        assert_eq!(parsed["user_window_offsets"]["100"]["proj"], 7);
        assert!(parsed.get("window_states").is_some());
    }

    #[test]
    fn session_file_path_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path());
        let path = store
            .build_session_file_path("abc-123", "/data/code/muxbot")
            .unwrap();
        assert!(path
            .display()
            .to_string()
            .ends_with("projects/-data-code-muxbot/abc-123.jsonl"));
        assert!(store.build_session_file_path("", "/x").is_none());
        assert!(store.build_session_file_path("sid", "").is_none());
    }

    #[tokio::test]
    async fn session_map_ingestion_updates_and_gcs() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path());

        // Pre-existing state for a window that will disappear.
        store.bind(100, 1, "gone");
        let map = serde_json::json!({
            "muxbot:proj": {"session_id": "sid-1", "cwd": "/data/proj"},
            "other-session:ignored": {"session_id": "sid-2", "cwd": "/x"},
        });
        std::fs::write(
            dir.path().join("session_map.json"),
            serde_json::to_string(&map).unwrap(),
        )
        .unwrap();

        assert!(store.load_session_map().await);
        let state = store.window_state("proj");
        assert_eq!(state.session_id, "sid-1");
        assert_eq!(state.cwd, "/data/proj");
        // Entries from other multiplexer sessions are ignored.
        assert_eq!(store.window_state("ignored").session_id, "");
    }

    #[tokio::test]
    async fn wait_for_session_map_entry_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path());
        let found = store
            .wait_for_session_map_entry("proj", None, Duration::from_millis(50))
            .await;
        assert!(!found);
    }

    #[tokio::test]
    async fn wait_for_session_map_excludes_old_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path());
        let map = serde_json::json!({
            "muxbot:proj": {"session_id": "old-sid", "cwd": "/p"},
        });
        std::fs::write(
            dir.path().join("session_map.json"),
            serde_json::to_string(&map).unwrap(),
        )
        .unwrap();

        // Entry exists, but it is the excluded (pre-restart) session.
        let found = store
            .wait_for_session_map_entry("proj", Some("old-sid"), Duration::from_millis(50))
            .await;
        assert!(!found);

        let found = store
            .wait_for_session_map_entry("proj", Some("different"), Duration::from_millis(300))
            .await;
        assert!(found);
    }

    #[tokio::test]
    async fn unread_info_initializes_on_first_view() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path());

        let proj_dir = dir.path().join("projects/-data-proj");
        std::fs::create_dir_all(&proj_dir).unwrap();
        let record = r#"{"type":"user","message":{"content":[{"type":"text","text":"hi"}]}}"#;
        std::fs::write(proj_dir.join("sid-1.jsonl"), format!("{record}\n")).unwrap();

        let map = serde_json::json!({
            "muxbot:proj": {"session_id": "sid-1", "cwd": "/data/proj"},
        });
        std::fs::write(
            dir.path().join("session_map.json"),
            serde_json::to_string(&map).unwrap(),
        )
        .unwrap();
        store.load_session_map().await;

        let info = store.unread_info(100, "proj").await.unwrap();
        assert!(!info.has_unread);
        assert_eq!(info.start_offset, info.end_offset);
        // The offset is now recorded.
        assert_eq!(store.read_offset(100, "proj"), Some(info.end_offset));

        // Append — now there is unread content.
        let file = proj_dir.join("sid-1.jsonl");
        let mut content = std::fs::read_to_string(&file).unwrap();
        content.push_str(record);
        content.push('\n');
        std::fs::write(&file, content).unwrap();

        let info2 = store.unread_info(100, "proj").await.unwrap();
        assert!(info2.has_unread);
        assert!(info2.end_offset > info2.start_offset);
    }

    #[tokio::test]
    async fn resolve_session_reads_summary_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path());

        let proj_dir = dir.path().join("projects/-data-proj");
        std::fs::create_dir_all(&proj_dir).unwrap();
        let lines = [
            r#"{"type":"summary","summary":"Fixing the build"}"#,
            r#"{"type":"user","message":{"content":[{"type":"text","text":"please fix"}]}}"#,
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"done"}]}}"#,
        ];
        std::fs::write(proj_dir.join("sid-9.jsonl"), lines.join("\n")).unwrap();

        let map = serde_json::json!({
            "muxbot:proj": {"session_id": "sid-9", "cwd": "/data/proj"},
        });
        std::fs::write(
            dir.path().join("session_map.json"),
            serde_json::to_string(&map).unwrap(),
        )
        .unwrap();
        store.load_session_map().await;

        let session = store.resolve_session_for_window("proj").await.unwrap();
        assert_eq!(session.session_id, "sid-9");
        assert_eq!(session.summary, "Fixing the build");
        assert_eq!(session.message_count, 3);
    }

    #[tokio::test]
    async fn missing_transcript_clears_window_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path());
        std::fs::create_dir_all(dir.path().join("projects")).unwrap();

        let map = serde_json::json!({
            "muxbot:proj": {"session_id": "sid-gone", "cwd": "/data/proj"},
        });
        std::fs::write(
            dir.path().join("session_map.json"),
            serde_json::to_string(&map).unwrap(),
        )
        .unwrap();
        store.load_session_map().await;

        assert!(store.resolve_session_for_window("proj").await.is_none());
        assert_eq!(store.window_state("proj").session_id, "");
    }

    #[tokio::test]
    async fn recent_messages_respects_byte_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path());

        let proj_dir = dir.path().join("projects/-data-proj");
        std::fs::create_dir_all(&proj_dir).unwrap();
        let line1 = r#"{"type":"user","message":{"content":[{"type":"text","text":"first"}]}}"#;
        let line2 = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"second"}]}}"#;
        let content = format!("{line1}\n{line2}\n");
        std::fs::write(proj_dir.join("sid-1.jsonl"), &content).unwrap();

        let map = serde_json::json!({
            "muxbot:proj": {"session_id": "sid-1", "cwd": "/data/proj"},
        });
        std::fs::write(
            dir.path().join("session_map.json"),
            serde_json::to_string(&map).unwrap(),
        )
        .unwrap();
        store.load_session_map().await;

        let all = store.recent_messages("proj", 0, None).await;
        assert_eq!(all.len(), 2);

        let tail = store
            .recent_messages("proj", (line1.len() + 1) as u64, None)
            .await;
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].text, "second");
    }
}

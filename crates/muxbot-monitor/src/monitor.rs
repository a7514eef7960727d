//! The transcript monitor task.
//!
//! A single polling loop that:
//!   1. Re-ingests the session map and reconciles it against the previous
//!      snapshot (replaced/deleted windows drop their tracked sessions).
//!   2. Scans project directories for transcript files whose cwd belongs
//!      to an active multiplexer window.
//!   3. Tails each candidate from its stored byte offset (mtime cache
//!      skips untouched files; truncation resets the offset).
//!   4. Parses new records in streaming mode with a per-session pending
//!      map and hands each event to the registered callback.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use muxbot_mux::MuxBackend;
use muxbot_sessions::SessionStore;
use muxbot_transcript::{ParsedEvent, PendingTools, Role};

use crate::state::{MonitorState, TrackedSession};

/// A parsed transcript event attributed to its session.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub session_id: String,
    pub event: ParsedEvent,
}

pub type EventCallback = Arc<dyn Fn(SessionEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// A transcript file eligible for tailing this tick.
#[derive(Debug, Clone)]
struct Candidate {
    session_id: String,
    file_path: PathBuf,
}

pub struct SessionMonitor {
    store: Arc<SessionStore>,
    mux: Arc<dyn MuxBackend>,
    projects_path: PathBuf,
    poll_interval: Duration,
    show_user_messages: bool,
    state: MonitorState,
    callback: EventCallback,
    cancel: CancellationToken,
    /// session_id → pending tool_use blocks carried across poll cycles.
    pending_tools: HashMap<String, PendingTools>,
    /// window_name → session_id snapshot from the previous tick.
    last_session_map: HashMap<String, String>,
    /// session_id → last seen mtime (in-memory only).
    file_mtimes: HashMap<String, SystemTime>,
}

impl SessionMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<SessionStore>,
        mux: Arc<dyn MuxBackend>,
        projects_path: &Path,
        monitor_state_file: &Path,
        poll_interval: Duration,
        show_user_messages: bool,
        callback: EventCallback,
        cancel: CancellationToken,
    ) -> Self {
        let mut state = MonitorState::new(monitor_state_file);
        state.load();
        Self {
            store,
            mux,
            projects_path: projects_path.to_path_buf(),
            poll_interval,
            show_user_messages,
            state,
            callback,
            cancel,
            pending_tools: HashMap::new(),
            last_session_map: HashMap::new(),
            file_mtimes: HashMap::new(),
        }
    }

    /// Drive the poll loop until cancellation, then save state.
    pub async fn run(mut self) {
        info!(interval = ?self.poll_interval, "session monitor started");

        self.cleanup_all_stale_sessions().await;
        self.last_session_map = self.store.session_map_windows().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
            self.tick().await;
        }

        self.state.save();
        info!("session monitor stopped, state saved");
    }

    async fn tick(&mut self) {
        // Fold hook updates into the window states first so dispatch
        // lookups see fresh session ids.
        self.store.load_session_map().await;

        let current_map = self.detect_and_cleanup_changes().await;
        let active_session_ids: HashSet<String> = current_map.into_values().collect();

        let events = self.check_for_updates(&active_session_ids).await;
        for event in events {
            let preview: String = event.event.text.chars().take(80).collect();
            info!(session = %event.session_id, text = %preview, "transcript event");
            (self.callback)(event).await;
        }
    }

    /// Startup pass: drop every tracked session the map no longer knows.
    /// Cleans up state from prior runs against now-deleted windows.
    async fn cleanup_all_stale_sessions(&mut self) {
        let current = self.store.session_map_windows().await;
        let active: HashSet<&String> = current.values().collect();

        let stale: Vec<String> = self
            .state
            .tracked_sessions
            .keys()
            .filter(|sid| !active.contains(sid))
            .cloned()
            .collect();
        if !stale.is_empty() {
            info!(count = stale.len(), "startup cleanup: removing stale sessions");
            for session_id in stale {
                self.state.remove_session(&session_id);
                self.file_mtimes.remove(&session_id);
                self.pending_tools.remove(&session_id);
            }
            self.state.save_if_dirty();
        }
    }

    /// Diff the session map against the previous snapshot; sessions of
    /// replaced or deleted windows stop being tracked.
    async fn detect_and_cleanup_changes(&mut self) -> HashMap<String, String> {
        let current = self.store.session_map_windows().await;

        let mut to_remove: HashSet<String> = HashSet::new();
        for (window, old_sid) in &self.last_session_map {
            match current.get(window) {
                Some(new_sid) if new_sid != old_sid => {
                    info!(window = %window, old = %old_sid, new = %new_sid, "window session changed");
                    to_remove.insert(old_sid.clone());
                }
                None => {
                    info!(window = %window, session = %old_sid, "window deleted, dropping session");
                    to_remove.insert(old_sid.clone());
                }
                _ => {}
            }
        }

        if !to_remove.is_empty() {
            for session_id in &to_remove {
                self.state.remove_session(session_id);
                self.file_mtimes.remove(session_id);
                self.pending_tools.remove(session_id);
            }
            self.state.save_if_dirty();
        }

        self.last_session_map = current.clone();
        current
    }

    /// Normalized cwds of all live multiplexer windows.
    async fn active_cwds(&self) -> HashSet<String> {
        let mut cwds = HashSet::new();
        for w in self.mux.list_windows().await {
            match std::fs::canonicalize(&w.cwd) {
                Ok(p) => {
                    cwds.insert(p.display().to_string());
                }
                Err(_) => {
                    cwds.insert(w.cwd);
                }
            }
        }
        cwds
    }

    fn normalize(path: &str) -> String {
        std::fs::canonicalize(path)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| path.to_string())
    }

    /// Scan project directories for transcripts of active windows.
    ///
    /// Each project directory may carry a `sessions-index.json`; files it
    /// does not mention are picked up by a `*.jsonl` sweep, recovering
    /// the project path from the index, the file itself, or the
    /// directory-name encoding.
    async fn scan_projects(&self) -> Vec<Candidate> {
        let active_cwds = self.active_cwds().await;
        if active_cwds.is_empty() {
            return Vec::new();
        }

        let mut sessions = Vec::new();
        let Ok(mut project_dirs) = tokio::fs::read_dir(&self.projects_path).await else {
            return sessions;
        };

        while let Ok(Some(entry)) = project_dirs.next_entry().await {
            let project_dir = entry.path();
            if !project_dir.is_dir() {
                continue;
            }

            let mut indexed_ids: HashSet<String> = HashSet::new();
            let mut original_path = String::new();

            let index_file = project_dir.join("sessions-index.json");
            if let Ok(content) = tokio::fs::read_to_string(&index_file).await {
                if let Ok(index) = serde_json::from_str::<Value>(&content) {
                    original_path = index
                        .get("originalPath")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    for item in index
                        .get("entries")
                        .and_then(Value::as_array)
                        .into_iter()
                        .flatten()
                    {
                        let session_id = item
                            .get("sessionId")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        let full_path = item
                            .get("fullPath")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        if session_id.is_empty() || full_path.is_empty() {
                            continue;
                        }
                        let project_path = item
                            .get("projectPath")
                            .and_then(Value::as_str)
                            .unwrap_or(&original_path);
                        if !active_cwds.contains(&Self::normalize(project_path)) {
                            continue;
                        }
                        indexed_ids.insert(session_id.to_string());
                        let file_path = PathBuf::from(full_path);
                        if file_path.exists() {
                            sessions.push(Candidate {
                                session_id: session_id.to_string(),
                                file_path,
                            });
                        }
                    }
                }
            }

            // Un-indexed transcripts.
            let Ok(mut files) = tokio::fs::read_dir(&project_dir).await else {
                continue;
            };
            while let Ok(Some(file)) = files.next_entry().await {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                    continue;
                }
                let Some(session_id) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                if indexed_ids.contains(session_id) {
                    continue;
                }

                let mut project_path = original_path.clone();
                if project_path.is_empty() {
                    project_path = read_cwd_from_jsonl(&path).await.unwrap_or_default();
                }
                if project_path.is_empty() {
                    if let Some(dir_name) = project_dir.file_name().and_then(|n| n.to_str()) {
                        if dir_name.starts_with('-') {
                            project_path = dir_name.replace('-', "/");
                        }
                    }
                }

                if !active_cwds.contains(&Self::normalize(&project_path)) {
                    continue;
                }
                sessions.push(Candidate {
                    session_id: session_id.to_string(),
                    file_path: path,
                });
            }
        }

        sessions
    }

    /// Read new records from the stored offset, resetting on truncation.
    async fn read_new_records(
        session: &mut TrackedSession,
        file_path: &Path,
    ) -> Vec<Value> {
        let mut records = Vec::new();
        let mut file = match tokio::fs::File::open(file_path).await {
            Ok(f) => f,
            Err(e) => {
                error!(path = %file_path.display(), error = %e, "failed to open session file");
                return records;
            }
        };

        let file_size = match file.metadata().await {
            Ok(m) => m.len(),
            Err(_) => 0,
        };
        if session.last_byte_offset > file_size {
            info!(
                session = %session.session_id,
                offset = session.last_byte_offset,
                size = file_size,
                "file truncated, resetting offset"
            );
            session.last_byte_offset = 0;
        }

        if file
            .seek(std::io::SeekFrom::Start(session.last_byte_offset))
            .await
            .is_err()
        {
            return records;
        }

        let mut buf = Vec::new();
        match file.read_to_end(&mut buf).await {
            Ok(read) => {
                let text = String::from_utf8_lossy(&buf);
                for line in text.lines() {
                    if let Some(record) = muxbot_transcript::parse_line(line) {
                        records.push(record);
                    }
                }
                session.last_byte_offset += read as u64;
            }
            Err(e) => {
                error!(path = %file_path.display(), error = %e, "failed to read session file");
            }
        }
        records
    }

    /// One sweep over all candidates; returns the events to deliver.
    pub async fn check_for_updates(
        &mut self,
        active_session_ids: &HashSet<String>,
    ) -> Vec<SessionEvent> {
        let mut out = Vec::new();

        for candidate in self.scan_projects().await {
            if !active_session_ids.contains(&candidate.session_id) {
                continue;
            }

            let mut tracked = match self.state.get_session(&candidate.session_id) {
                Some(t) => t.clone(),
                None => {
                    // New session: start at end of file so the backlog is
                    // not replayed.
                    let (size, mtime) = match std::fs::metadata(&candidate.file_path) {
                        Ok(m) => (m.len(), m.modified().ok()),
                        Err(_) => (0, None),
                    };
                    let tracked = TrackedSession {
                        session_id: candidate.session_id.clone(),
                        file_path: candidate.file_path.display().to_string(),
                        last_byte_offset: size,
                    };
                    self.state.update_session(tracked);
                    if let Some(mtime) = mtime {
                        self.file_mtimes.insert(candidate.session_id.clone(), mtime);
                    }
                    info!(session = %candidate.session_id, "started tracking session");
                    continue;
                }
            };

            let Ok(metadata) = std::fs::metadata(&candidate.file_path) else {
                continue;
            };
            let Ok(current_mtime) = metadata.modified() else {
                continue;
            };
            if let Some(last_mtime) = self.file_mtimes.get(&candidate.session_id) {
                if current_mtime <= *last_mtime {
                    continue;
                }
            }

            let records = Self::read_new_records(&mut tracked, &candidate.file_path).await;
            self.file_mtimes
                .insert(candidate.session_id.clone(), current_mtime);
            if !records.is_empty() {
                debug!(
                    session = %candidate.session_id,
                    count = records.len(),
                    "read new transcript records"
                );
            }

            let carry = self
                .pending_tools
                .remove(&candidate.session_id)
                .unwrap_or_default();
            let (events, remaining) = muxbot_transcript::parse_entries(&records, Some(carry));
            if !remaining.is_empty() {
                self.pending_tools
                    .insert(candidate.session_id.clone(), remaining);
            }

            for event in events {
                if event.text.is_empty() {
                    continue;
                }
                if event.role == Role::User && !self.show_user_messages {
                    continue;
                }
                out.push(SessionEvent {
                    session_id: candidate.session_id.clone(),
                    event,
                });
            }

            self.state.update_session(tracked);
        }

        self.state.save_if_dirty();
        out
    }
}

/// Recover the project path from a transcript's own records: the first
/// few lines normally carry a `cwd` field.
async fn read_cwd_from_jsonl(path: &Path) -> Option<String> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    for line in content.lines().take(10) {
        if let Some(record) = muxbot_transcript::parse_line(line) {
            if let Some(cwd) = record.get("cwd").and_then(Value::as_str) {
                if !cwd.is_empty() {
                    return Some(cwd.to_string());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use muxbot_core::error::Result as CoreResult;
    use muxbot_mux::{CreatedWindow, MuxWindow};
    use std::sync::Mutex as StdMutex;

    /// Backend stub: a fixed window list, everything else inert.
    struct StubMux {
        windows: StdMutex<Vec<MuxWindow>>,
    }

    impl StubMux {
        fn with_windows(windows: Vec<MuxWindow>) -> Arc<Self> {
            Arc::new(Self {
                windows: StdMutex::new(windows),
            })
        }
    }

    #[async_trait]
    impl MuxBackend for StubMux {
        async fn ensure_session(&self) -> CoreResult<()> {
            Ok(())
        }
        async fn list_windows(&self) -> Vec<MuxWindow> {
            self.windows.lock().unwrap().clone()
        }
        async fn capture_pane(&self, _window_id: &str, _with_ansi: bool) -> Option<String> {
            None
        }
        async fn send_keys(
            &self,
            _window_id: &str,
            _text: &str,
            _enter: bool,
            _literal: bool,
        ) -> bool {
            true
        }
        async fn kill_window(&self, _window_id: &str) -> bool {
            true
        }
        async fn create_window(
            &self,
            _work_dir: &str,
            _window_name: Option<&str>,
            _start_assistant: bool,
        ) -> CoreResult<CreatedWindow> {
            Ok(CreatedWindow {
                window_name: "w".into(),
                message: "ok".into(),
            })
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        monitor: SessionMonitor,
        transcript: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let cwd_dir = root.join("work/proj");
        std::fs::create_dir_all(&cwd_dir).unwrap();
        let cwd = cwd_dir.canonicalize().unwrap().display().to_string();

        let project_dir = root.join(format!("projects/{}", cwd.replace('/', "-")));
        std::fs::create_dir_all(&project_dir).unwrap();
        let transcript = project_dir.join("sid-1.jsonl");
        std::fs::write(&transcript, "").unwrap();

        let map = serde_json::json!({
            "muxbot:proj": {"session_id": "sid-1", "cwd": cwd},
        });
        std::fs::write(
            root.join("session_map.json"),
            serde_json::to_string(&map).unwrap(),
        )
        .unwrap();

        let store = Arc::new(SessionStore::new(
            &root.join("state.json"),
            &root.join("session_map.json"),
            "muxbot",
            &root.join("projects"),
        ));

        let mux = StubMux::with_windows(vec![MuxWindow {
            window_id: "@1".into(),
            window_name: "proj".into(),
            cwd,
        }]);

        let callback: EventCallback =
            Arc::new(|_event| -> BoxFuture<'static, ()> { Box::pin(async {}) });
        let monitor = SessionMonitor::new(
            store,
            mux,
            &root.join("projects"),
            &root.join("monitor_state.json"),
            Duration::from_millis(10),
            true,
            callback,
            CancellationToken::new(),
        );

        Fixture {
            _dir: dir,
            monitor,
            transcript,
        }
    }

    fn append_line(path: &Path, line: &str) {
        let mut content = std::fs::read_to_string(path).unwrap_or_default();
        content.push_str(line);
        content.push('\n');
        std::fs::write(path, content).unwrap();
        // Nudge mtime forward — same-second writes must still be seen.
        let now = std::time::SystemTime::now() + Duration::from_secs(2);
        let file = std::fs::File::options().append(true).open(path).unwrap();
        let _ = file.set_modified(now);
    }

    fn active() -> HashSet<String> {
        HashSet::from(["sid-1".to_string()])
    }

    #[tokio::test]
    async fn first_sight_initializes_offset_to_eof() {
        let mut fx = fixture();
        append_line(
            &fx.transcript,
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"old"}]}}"#,
        );

        let events = fx.monitor.check_for_updates(&active()).await;
        // First sweep only starts tracking; the backlog is not replayed.
        assert!(events.is_empty());
        let tracked = fx.monitor.state.get_session("sid-1").unwrap();
        assert!(tracked.last_byte_offset > 0);
    }

    #[tokio::test]
    async fn incremental_read_emits_only_new_events() {
        let mut fx = fixture();
        fx.monitor.check_for_updates(&active()).await;

        append_line(
            &fx.transcript,
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"fresh"}]}}"#,
        );
        let events = fx.monitor.check_for_updates(&active()).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.text, "fresh");

        // No change → no events (mtime cache short-circuits).
        let events = fx.monitor.check_for_updates(&active()).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn truncation_resets_offset_and_redelivers() {
        let mut fx = fixture();
        append_line(
            &fx.transcript,
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"a long first message"}]}}"#,
        );
        fx.monitor.check_for_updates(&active()).await;

        // Truncate below the stored offset.
        std::fs::write(&fx.transcript, "").unwrap();
        append_line(
            &fx.transcript,
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"rewound"}]}}"#,
        );
        let events = fx.monitor.check_for_updates(&active()).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.text, "rewound");
    }

    #[tokio::test]
    async fn tool_pairing_survives_poll_cycles() {
        let mut fx = fixture();
        fx.monitor.check_for_updates(&active()).await;

        append_line(
            &fx.transcript,
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"T1","name":"Bash","input":{"command":"ls"}}]}}"#,
        );
        let events = fx.monitor.check_for_updates(&active()).await;
        assert_eq!(events.len(), 1);
        assert!(events[0].event.text.contains("**Bash**"));

        append_line(
            &fx.transcript,
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"T1","content":"a\nb\n"}]}}"#,
        );
        let events = fx.monitor.check_for_updates(&active()).await;
        assert_eq!(events.len(), 1);
        assert!(events[0].event.text.contains("Output:"));
        assert!(fx.monitor.pending_tools.is_empty());
    }

    #[tokio::test]
    async fn inactive_sessions_are_ignored() {
        let mut fx = fixture();
        append_line(
            &fx.transcript,
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"x"}]}}"#,
        );
        let events = fx
            .monitor
            .check_for_updates(&HashSet::from(["other-sid".to_string()]))
            .await;
        assert!(events.is_empty());
        assert!(fx.monitor.state.get_session("sid-1").is_none());
    }

    #[tokio::test]
    async fn session_map_change_drops_tracked_session() {
        let mut fx = fixture();
        fx.monitor.check_for_updates(&active()).await;
        assert!(fx.monitor.state.get_session("sid-1").is_some());
        fx.monitor.last_session_map = fx.monitor.store.session_map_windows().await;

        // The hook replaced the window's session (e.g. after /clear).
        let root = fx.transcript.parent().unwrap().parent().unwrap().parent().unwrap();
        let map = serde_json::json!({
            "muxbot:proj": {"session_id": "sid-2", "cwd": "/elsewhere"},
        });
        std::fs::write(
            root.join("session_map.json"),
            serde_json::to_string(&map).unwrap(),
        )
        .unwrap();

        let current = fx.monitor.detect_and_cleanup_changes().await;
        assert_eq!(current.get("proj").map(String::as_str), Some("sid-2"));
        assert!(fx.monitor.state.get_session("sid-1").is_none());
    }
}

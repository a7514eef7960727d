//! The multiplexer capability set.

use std::path::PathBuf;
use std::process::Output;

use async_trait::async_trait;
use muxbot_core::error::{MuxbotError, Result};
use tokio::process::Command;
use tracing::debug;

/// A multiplexer window (tmux window or Zellij tab).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxWindow {
    /// Backend-specific opaque id (tmux: `@5`, Zellij: the tab name).
    pub window_id: String,
    /// Human-readable name.
    pub window_name: String,
    /// Current working directory of the active pane.
    pub cwd: String,
}

/// Result of a successful `create_window`.
#[derive(Debug, Clone)]
pub struct CreatedWindow {
    pub window_name: String,
    pub message: String,
}

/// Abstract capability set for terminal multiplexer backends.
#[async_trait]
pub trait MuxBackend: Send + Sync {
    /// Ensure the multiplexer session exists.
    ///
    /// tmux creates the session headlessly; Zellij can only verify an
    /// existing one and errors when it is missing.
    async fn ensure_session(&self) -> Result<()>;

    /// All windows in the session, excluding the main placeholder.
    async fn list_windows(&self) -> Vec<MuxWindow>;

    /// Find a window by name. Both backends share the linear scan.
    async fn find_window(&self, window_name: &str) -> Option<MuxWindow> {
        let found = self
            .list_windows()
            .await
            .into_iter()
            .find(|w| w.window_name == window_name);
        if found.is_none() {
            debug!(window = window_name, "window not found");
        }
        found
    }

    /// Capture the visible text of a window's active pane.
    ///
    /// `with_ansi` keeps escape sequences where the backend supports it;
    /// Zellij falls back to plain text with a once-logged warning.
    /// Returns `None` on failure.
    async fn capture_pane(&self, window_id: &str, with_ansi: bool) -> Option<String>;

    /// Send keys to a window.
    ///
    /// `literal=true` sends the exact text; `literal=false` interprets
    /// special key tokens (`Up`, `Down`, `Left`, `Right`, `Enter`,
    /// `Escape`). With `literal=true, enter=true` a ≥500 ms gap separates
    /// the text from the Enter keystroke — the assistant's TUI treats a
    /// same-batch Enter as a newline instead of submit.
    async fn send_keys(&self, window_id: &str, text: &str, enter: bool, literal: bool) -> bool;

    /// Kill a window by id.
    async fn kill_window(&self, window_id: &str) -> bool;

    /// Create a window at `work_dir`, optionally starting the assistant.
    ///
    /// Validates the directory and dedupes the window name by appending
    /// `-2`, `-3`, … The error string is user-presentable.
    async fn create_window(
        &self,
        work_dir: &str,
        window_name: Option<&str>,
        start_assistant: bool,
    ) -> Result<CreatedWindow>;
}

/// Run a subprocess and collect its output.
pub(crate) async fn run_command(program: &str, args: &[&str]) -> Result<Output> {
    debug!(program, ?args, "exec");
    Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| MuxbotError::Multiplexer(format!("failed to run {program}: {e}")))
}

pub(crate) fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub(crate) fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Expand a leading `~` and resolve the path; errors are user-facing.
pub(crate) fn validate_work_dir(work_dir: &str) -> Result<PathBuf> {
    let expanded = if let Some(rest) = work_dir.strip_prefix("~") {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(format!("{home}{rest}"))
    } else {
        PathBuf::from(work_dir)
    };

    let path = expanded
        .canonicalize()
        .map_err(|_| MuxbotError::Multiplexer(format!("Directory does not exist: {work_dir}")))?;
    if !path.is_dir() {
        return Err(MuxbotError::Multiplexer(format!("Not a directory: {work_dir}")));
    }
    Ok(path)
}

/// Dedupe `base` against `taken` by appending `-2`, `-3`, …
pub(crate) fn dedupe_window_name(base: &str, taken: &[String]) -> String {
    if !taken.iter().any(|n| n == base) {
        return base.to_string();
    }
    let mut counter = 2;
    loop {
        let candidate = format!("{base}-{counter}");
        if !taken.iter().any(|n| n == &candidate) {
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_unused_name_passes_through() {
        assert_eq!(dedupe_window_name("proj", &[]), "proj");
    }

    #[test]
    fn dedupe_appends_counter() {
        let taken = vec!["proj".to_string(), "proj-2".to_string()];
        assert_eq!(dedupe_window_name("proj", &taken), "proj-3");
    }

    #[test]
    fn validate_rejects_missing_dir() {
        assert!(validate_work_dir("/definitely/not/a/real/dir").is_err());
    }

    #[test]
    fn validate_accepts_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = validate_work_dir(dir.path().to_str().unwrap()).unwrap();
        assert!(path.is_dir());
    }

    #[test]
    fn validate_rejects_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(validate_work_dir(file.to_str().unwrap()).is_err());
    }
}

//! Zellij backend — drives the `zellij` CLI on a single named session.
//!
//! Zellij actions operate on the focused tab, so every operation that
//! needs tab targeting navigates first and is serialized behind one
//! mutex to prevent focus races.
//!
//! Limitations vs tmux: no ANSI capture (plain text only), no headless
//! session creation (the session must pre-exist), and tab close is
//! focus-dependent.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use muxbot_core::error::{MuxbotError, Result};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::backend::{
    dedupe_window_name, run_command, stderr_of, stdout_of, validate_work_dir, CreatedWindow,
    MuxBackend, MuxWindow,
};

const ENTER_DELAY: Duration = Duration::from_millis(500);
const STARTUP_DELAY: Duration = Duration::from_millis(300);

static ANSI_WARNED: AtomicBool = AtomicBool::new(false);

pub struct ZellijBackend {
    session_name: String,
    main_window: String,
    assistant_command: String,
    /// Serializes all focus-dependent operations.
    focus_lock: Mutex<()>,
}

impl ZellijBackend {
    pub fn new(session_name: &str, main_window: &str, assistant_command: &str) -> Self {
        Self {
            session_name: session_name.to_string(),
            main_window: main_window.to_string(),
            assistant_command: assistant_command.to_string(),
            focus_lock: Mutex::new(()),
        }
    }

    async fn action(&self, args: &[&str]) -> Result<(bool, String, String)> {
        let mut full: Vec<&str> = vec!["--session", &self.session_name, "action"];
        full.extend_from_slice(args);
        let output = run_command("zellij", &full).await?;
        Ok((output.status.success(), stdout_of(&output), stderr_of(&output)))
    }

    async fn go_to_tab(&self, tab_name: &str) -> bool {
        matches!(
            self.action(&["go-to-tab-name", tab_name]).await,
            Ok((true, _, _))
        )
    }

    /// Parse tab cwds out of the dump-layout KDL:
    /// `tab name="xxx" { pane cwd="/path" ... }`.
    fn parse_tab_cwds(layout: &str) -> Vec<(String, String)> {
        let mut result = Vec::new();
        let mut rest = layout;
        while let Some(tab_pos) = rest.find("tab ") {
            let after_tab = &rest[tab_pos..];
            let Some(brace) = after_tab.find('{') else {
                break;
            };
            let header = &after_tab[..brace];
            let body_start = tab_pos + brace + 1;
            let body_end = rest[body_start..]
                .find('}')
                .map(|i| body_start + i)
                .unwrap_or(rest.len());
            let body = &rest[body_start..body_end];

            if let Some(name) = extract_kdl_string(header, "name=\"") {
                if let Some(cwd) = extract_kdl_string(body, "cwd=\"") {
                    result.push((name, cwd));
                }
            }
            rest = &rest[body_end.min(rest.len())..];
            if rest.starts_with('}') {
                rest = &rest[1..];
            }
        }
        result
    }

    /// Send a special key by name (arrow escape sequences, Enter, Escape).
    async fn send_special_key(&self, key: &str) -> bool {
        let result = match key.to_ascii_lowercase().as_str() {
            "escape" | "\x1b" => self.action(&["write", "27"]).await,
            "enter" => self.action(&["write", "13"]).await,
            "up" => self.action(&["write-chars", "\x1b[A"]).await,
            "down" => self.action(&["write-chars", "\x1b[B"]).await,
            "right" => self.action(&["write-chars", "\x1b[C"]).await,
            "left" => self.action(&["write-chars", "\x1b[D"]).await,
            // Unknown token: pass the original text through as chars.
            _ => self.action(&["write-chars", key]).await,
        };
        matches!(result, Ok((true, _, _)))
    }
}

fn extract_kdl_string(haystack: &str, marker: &str) -> Option<String> {
    let start = haystack.find(marker)? + marker.len();
    let end = haystack[start..].find('"')? + start;
    Some(haystack[start..end].to_string())
}

#[async_trait]
impl MuxBackend for ZellijBackend {
    async fn ensure_session(&self) -> Result<()> {
        let output = run_command("zellij", &["list-sessions", "--short", "--no-formatting"]).await?;
        let stdout = stdout_of(&output);
        if stdout.lines().map(str::trim).any(|s| s == self.session_name) {
            return Ok(());
        }
        Err(MuxbotError::Multiplexer(format!(
            "Zellij session '{}' not found. Create it first: zellij -s {}",
            self.session_name, self.session_name
        )))
    }

    async fn list_windows(&self) -> Vec<MuxWindow> {
        let (ok, stdout, _) = match self.action(&["query-tab-names"]).await {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "query-tab-names failed");
                return Vec::new();
            }
        };
        if !ok {
            return Vec::new();
        }

        let tab_names: Vec<String> = stdout
            .lines()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect();

        let cwds = match self.action(&["dump-layout"]).await {
            Ok((true, layout, _)) => Self::parse_tab_cwds(&layout),
            _ => Vec::new(),
        };

        tab_names
            .into_iter()
            .filter(|name| name != &self.main_window)
            .map(|name| {
                let cwd = cwds
                    .iter()
                    .find(|(n, _)| n == &name)
                    .map(|(_, c)| c.clone())
                    .unwrap_or_default();
                MuxWindow {
                    window_id: name.clone(),
                    window_name: name,
                    cwd,
                }
            })
            .collect()
    }

    async fn capture_pane(&self, window_id: &str, with_ansi: bool) -> Option<String> {
        if with_ansi && !ANSI_WARNED.swap(true, Ordering::Relaxed) {
            warn!("Zellij does not support ANSI capture; falling back to plain text");
        }

        let _guard = self.focus_lock.lock().await;
        if !self.go_to_tab(window_id).await {
            return None;
        }

        let tmp: PathBuf =
            std::env::temp_dir().join(format!("muxbot_zellij_{}.txt", std::process::id()));
        let tmp_str = tmp.display().to_string();
        let captured = match self.action(&["dump-screen", &tmp_str]).await {
            Ok((true, _, _)) => tokio::fs::read_to_string(&tmp).await.ok(),
            _ => None,
        };
        let _ = tokio::fs::remove_file(&tmp).await;
        captured
    }

    async fn send_keys(&self, window_id: &str, text: &str, enter: bool, literal: bool) -> bool {
        let _guard = self.focus_lock.lock().await;
        if !self.go_to_tab(window_id).await {
            error!(tab = window_id, "failed to navigate to tab");
            return false;
        }

        if literal {
            if !text.is_empty() {
                if !matches!(self.action(&["write-chars", text]).await, Ok((true, _, _))) {
                    error!(tab = window_id, "write-chars failed");
                    return false;
                }
            }
            if enter {
                tokio::time::sleep(ENTER_DELAY).await;
                if !matches!(self.action(&["write", "13"]).await, Ok((true, _, _))) {
                    error!(tab = window_id, "failed to send Enter");
                    return false;
                }
            }
            true
        } else {
            let ok = self.send_special_key(text).await;
            if !ok {
                error!(tab = window_id, key = text, "failed to send special key");
            }
            ok
        }
    }

    async fn kill_window(&self, window_id: &str) -> bool {
        let _guard = self.focus_lock.lock().await;
        if !self.go_to_tab(window_id).await {
            return false;
        }
        match self.action(&["close-tab"]).await {
            Ok((true, _, _)) => {
                info!(tab = window_id, "killed tab");
                true
            }
            _ => {
                error!(tab = window_id, "failed to close tab");
                false
            }
        }
    }

    async fn create_window(
        &self,
        work_dir: &str,
        window_name: Option<&str>,
        start_assistant: bool,
    ) -> Result<CreatedWindow> {
        let path = validate_work_dir(work_dir)?;

        let base = window_name
            .map(str::to_string)
            .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "session".to_string());
        let taken: Vec<String> = self
            .list_windows()
            .await
            .into_iter()
            .map(|w| w.window_name)
            .collect();
        let final_name = dedupe_window_name(&base, &taken);

        let path_str = path.display().to_string();
        let (ok, _, stderr) = self
            .action(&["new-tab", "--name", &final_name, "--cwd", &path_str])
            .await?;
        if !ok {
            return Err(MuxbotError::Multiplexer(format!(
                "Failed to create tab: {}",
                stderr.trim()
            )));
        }

        if start_assistant {
            tokio::time::sleep(STARTUP_DELAY).await;
            // The new tab holds focus, so no navigation is needed here.
            if matches!(
                self.action(&["write-chars", &self.assistant_command]).await,
                Ok((true, _, _))
            ) {
                tokio::time::sleep(ENTER_DELAY).await;
                let _ = self.action(&["write", "13"]).await;
            }
        }

        info!(tab = %final_name, path = %path.display(), "created tab");
        Ok(CreatedWindow {
            message: format!("Created window '{final_name}' at {}", path.display()),
            window_name: final_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tab_cwds_basic() {
        let layout = r#"
layout {
    tab name="proj" focus=true {
        pane cwd="/data/code/proj"
    }
    tab name="other" {
        pane cwd="/tmp/other"
    }
}
"#;
        let cwds = ZellijBackend::parse_tab_cwds(layout);
        assert!(cwds.contains(&("proj".to_string(), "/data/code/proj".to_string())));
        assert!(cwds.contains(&("other".to_string(), "/tmp/other".to_string())));
    }

    #[test]
    fn parse_tab_cwds_missing_cwd() {
        let layout = r#"tab name="bare" { pane }"#;
        assert!(ZellijBackend::parse_tab_cwds(layout).is_empty());
    }

    #[test]
    fn extract_kdl_string_finds_value() {
        assert_eq!(
            extract_kdl_string(r#"tab name="hello" focus=true"#, "name=\""),
            Some("hello".to_string())
        );
        assert_eq!(extract_kdl_string("tab focus=true", "name=\""), None);
    }
}

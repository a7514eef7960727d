//! Tmux backend — drives the `tmux` CLI on a single named session.

use std::time::Duration;

use async_trait::async_trait;
use muxbot_core::error::{MuxbotError, Result};
use tracing::{debug, error, info};

use crate::backend::{
    dedupe_window_name, run_command, stderr_of, stdout_of, validate_work_dir, CreatedWindow,
    MuxBackend, MuxWindow,
};

/// Gap between literal text and the Enter keystroke (see `send_keys`).
const ENTER_DELAY: Duration = Duration::from_millis(500);
/// Grace period for a fresh window's shell before typing the assistant
/// command into it.
const STARTUP_DELAY: Duration = Duration::from_millis(300);

pub struct TmuxBackend {
    session_name: String,
    main_window: String,
    assistant_command: String,
}

impl TmuxBackend {
    pub fn new(session_name: &str, main_window: &str, assistant_command: &str) -> Self {
        Self {
            session_name: session_name.to_string(),
            main_window: main_window.to_string(),
            assistant_command: assistant_command.to_string(),
        }
    }

    async fn tmux(&self, args: &[&str]) -> Result<(bool, String, String)> {
        let output = run_command("tmux", args).await?;
        Ok((output.status.success(), stdout_of(&output), stderr_of(&output)))
    }

    async fn has_session(&self) -> bool {
        // "=" prefix forces an exact session-name match.
        let target = format!("={}", self.session_name);
        matches!(
            self.tmux(&["has-session", "-t", &target]).await,
            Ok((true, _, _))
        )
    }
}

#[async_trait]
impl MuxBackend for TmuxBackend {
    async fn ensure_session(&self) -> Result<()> {
        if self.has_session().await {
            return Ok(());
        }

        let home = std::env::var("HOME").unwrap_or_else(|_| "/".to_string());
        let (ok, _, stderr) = self
            .tmux(&[
                "new-session",
                "-d",
                "-s",
                &self.session_name,
                "-n",
                &self.main_window,
                "-c",
                &home,
            ])
            .await?;
        if !ok {
            return Err(MuxbotError::Multiplexer(format!(
                "failed to create tmux session '{}': {}",
                self.session_name,
                stderr.trim()
            )));
        }
        info!(session = %self.session_name, "created tmux session");
        Ok(())
    }

    async fn list_windows(&self) -> Vec<MuxWindow> {
        let result = self
            .tmux(&[
                "list-windows",
                "-t",
                &self.session_name,
                "-F",
                "#{window_id}\t#{window_name}\t#{pane_current_path}",
            ])
            .await;

        let stdout = match result {
            Ok((true, stdout, _)) => stdout,
            Ok((false, _, stderr)) => {
                debug!(error = %stderr.trim(), "list-windows failed");
                return Vec::new();
            }
            Err(e) => {
                error!(error = %e, "list-windows failed");
                return Vec::new();
            }
        };

        stdout
            .lines()
            .filter_map(|line| {
                let mut parts = line.splitn(3, '\t');
                let window_id = parts.next()?.to_string();
                let window_name = parts.next()?.to_string();
                let cwd = parts.next().unwrap_or("").to_string();
                if window_name == self.main_window {
                    return None;
                }
                Some(MuxWindow {
                    window_id,
                    window_name,
                    cwd,
                })
            })
            .collect()
    }

    async fn capture_pane(&self, window_id: &str, with_ansi: bool) -> Option<String> {
        let result = if with_ansi {
            self.tmux(&["capture-pane", "-e", "-p", "-t", window_id]).await
        } else {
            self.tmux(&["capture-pane", "-p", "-t", window_id]).await
        };
        match result {
            Ok((true, stdout, _)) => Some(stdout),
            Ok((false, _, stderr)) => {
                error!(window = window_id, error = %stderr.trim(), "capture-pane failed");
                None
            }
            Err(e) => {
                error!(window = window_id, error = %e, "capture-pane failed");
                None
            }
        }
    }

    async fn send_keys(&self, window_id: &str, text: &str, enter: bool, literal: bool) -> bool {
        if literal {
            if !text.is_empty() {
                match self.tmux(&["send-keys", "-t", window_id, "-l", "--", text]).await {
                    Ok((true, _, _)) => {}
                    Ok((false, _, stderr)) => {
                        error!(window = window_id, error = %stderr.trim(), "send-keys failed");
                        return false;
                    }
                    Err(e) => {
                        error!(window = window_id, error = %e, "send-keys failed");
                        return false;
                    }
                }
            }
            if enter {
                // The TUI needs the text processed before Enter arrives.
                tokio::time::sleep(ENTER_DELAY).await;
                return matches!(
                    self.tmux(&["send-keys", "-t", window_id, "Enter"]).await,
                    Ok((true, _, _))
                );
            }
            return true;
        }

        // Special key tokens pass through to tmux's own key names.
        let ok = matches!(
            self.tmux(&["send-keys", "-t", window_id, text]).await,
            Ok((true, _, _))
        );
        if ok && enter {
            return matches!(
                self.tmux(&["send-keys", "-t", window_id, "Enter"]).await,
                Ok((true, _, _))
            );
        }
        ok
    }

    async fn kill_window(&self, window_id: &str) -> bool {
        match self.tmux(&["kill-window", "-t", window_id]).await {
            Ok((true, _, _)) => {
                info!(window = window_id, "killed window");
                true
            }
            Ok((false, _, stderr)) => {
                error!(window = window_id, error = %stderr.trim(), "kill-window failed");
                false
            }
            Err(e) => {
                error!(window = window_id, error = %e, "kill-window failed");
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

        self.ensure_session().await?;

        let target = format!("{}:", self.session_name);
        let path_str = path.display().to_string();
        let (ok, stdout, stderr) = self
            .tmux(&[
                "new-window",
                "-t",
                &target,
                "-n",
                &final_name,
                "-c",
                &path_str,
                "-P",
                "-F",
                "#{window_id}",
            ])
            .await?;
        if !ok {
            return Err(MuxbotError::Multiplexer(format!(
                "Failed to create window: {}",
                stderr.trim()
            )));
        }
        let window_id = stdout.trim().to_string();

        if start_assistant {
            tokio::time::sleep(STARTUP_DELAY).await;
            self.send_keys(&window_id, &self.assistant_command, true, true)
                .await;
        }

        info!(window = %final_name, path = %path.display(), "created window");
        Ok(CreatedWindow {
            message: format!("Created window '{final_name}' at {}", path.display()),
            window_name: final_name,
        })
    }
}

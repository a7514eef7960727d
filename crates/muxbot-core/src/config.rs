use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Interval between delivery-queue sends to the same chat (seconds).
pub const MESSAGE_SEND_INTERVAL_SECS: f64 = 1.1;
/// Merge limit for consecutive content tasks (leaves headroom for the
/// MarkdownV2 conversion below Telegram's 4096-char message cap).
pub const MERGE_MAX_LENGTH: usize = 3_800;
/// Pane poller tick.
pub const STATUS_POLL_INTERVAL_SECS: f64 = 1.0;
/// Topic existence probe cadence.
pub const TOPIC_CHECK_INTERVAL_SECS: f64 = 60.0;

/// Top-level config (muxbot.toml + MUXBOT_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuxbotConfig {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub multiplexer: MultiplexerConfig,
    #[serde(default)]
    pub claude: ClaudeConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub browse: BrowseConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Re-deliver transcript-recorded user turns (shown with a 👤 prefix).
    #[serde(default = "bool_true")]
    pub show_user_messages: bool,
    /// Directory for state.json / monitor_state.json / session_map.json.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// User ids served by the bot. Everyone else is refused.
    #[serde(default)]
    pub allowed_users: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MuxBackendKind {
    Tmux,
    Zellij,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiplexerConfig {
    #[serde(default = "default_backend")]
    pub backend: MuxBackendKind,
    #[serde(default = "default_session_name")]
    pub session_name: String,
    /// Placeholder window kept alive so the session survives with zero
    /// bound topics. Never listed, never bound.
    #[serde(default = "default_main_window")]
    pub main_window: String,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            session_name: default_session_name(),
            main_window: default_main_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeConfig {
    /// Command typed into freshly created windows.
    #[serde(default = "default_claude_command")]
    pub command: String,
    /// Root under which the assistant writes per-session transcripts.
    #[serde(default = "default_projects_path")]
    pub projects_path: PathBuf,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            command: default_claude_command(),
            projects_path: default_projects_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Transcript poll interval in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_s: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_s: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BrowseConfig {
    /// Initial directory for the directory picker. Defaults to $HOME.
    pub start_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotifyMode {
    /// Deliver every transcript event.
    Full,
    /// Only interactive prompts; suppress ordinary content.
    Interactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_notify_mode")]
    pub mode: NotifyMode,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            mode: default_notify_mode(),
        }
    }
}

impl MuxbotConfig {
    /// Load config from a TOML file with MUXBOT_* env var overrides.
    ///
    /// Checks the explicit path argument first, then ~/.muxbot/muxbot.toml.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: MuxbotConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("MUXBOT_").split("_"))
            .extract()
            .map_err(|e| crate::error::MuxbotError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn is_user_allowed(&self, user_id: u64) -> bool {
        self.telegram.allowed_users.contains(&user_id)
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join("state.json")
    }

    pub fn monitor_state_file(&self) -> PathBuf {
        self.state_dir.join("monitor_state.json")
    }

    /// Written by the external SessionStart hook; read-only here.
    pub fn session_map_file(&self) -> PathBuf {
        self.state_dir.join("session_map.json")
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
}

fn default_state_dir() -> PathBuf {
    home_dir().join(".muxbot")
}
fn default_config_path() -> String {
    home_dir().join(".muxbot/muxbot.toml").display().to_string()
}
fn default_backend() -> MuxBackendKind {
    MuxBackendKind::Tmux
}
fn default_session_name() -> String {
    "muxbot".to_string()
}
fn default_main_window() -> String {
    "__main__".to_string()
}
fn default_claude_command() -> String {
    "claude".to_string()
}
fn default_projects_path() -> PathBuf {
    home_dir().join(".claude/projects")
}
fn default_poll_interval() -> f64 {
    2.0
}
fn default_notify_mode() -> NotifyMode {
    NotifyMode::Full
}
fn bool_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> MuxbotConfig {
        serde_json::from_value(serde_json::json!({
            "telegram": { "bot_token": "t", "allowed_users": [100] }
        }))
        .unwrap()
    }

    #[test]
    fn defaults_fill_in() {
        let cfg = minimal();
        assert_eq!(cfg.multiplexer.backend, MuxBackendKind::Tmux);
        assert_eq!(cfg.multiplexer.session_name, "muxbot");
        assert_eq!(cfg.multiplexer.main_window, "__main__");
        assert_eq!(cfg.claude.command, "claude");
        assert!((cfg.monitor.poll_interval_s - 2.0).abs() < f64::EPSILON);
        assert_eq!(cfg.notify.mode, NotifyMode::Full);
        assert!(cfg.show_user_messages);
    }

    #[test]
    fn allowlist_check() {
        let cfg = minimal();
        assert!(cfg.is_user_allowed(100));
        assert!(!cfg.is_user_allowed(200));
    }

    #[test]
    fn state_paths_derive_from_state_dir() {
        let mut cfg = minimal();
        cfg.state_dir = PathBuf::from("/tmp/mb");
        assert_eq!(cfg.state_file(), PathBuf::from("/tmp/mb/state.json"));
        assert_eq!(
            cfg.session_map_file(),
            PathBuf::from("/tmp/mb/session_map.json")
        );
    }
}

//! Backend-agnostic terminal multiplexer API.
//!
//! [`MuxBackend`] is the capability set every backend implements; tmux
//! windows and Zellij tabs both surface as [`MuxWindow`]s. The backend is
//! selected once at startup via [`make_backend`].

pub mod backend;
mod tmux;
mod zellij;

use std::sync::Arc;

use muxbot_core::config::{MultiplexerConfig, MuxBackendKind};

pub use backend::{CreatedWindow, MuxBackend, MuxWindow};
pub use tmux::TmuxBackend;
pub use zellij::ZellijBackend;

/// Build the configured backend.
pub fn make_backend(config: &MultiplexerConfig, assistant_command: &str) -> Arc<dyn MuxBackend> {
    match config.backend {
        MuxBackendKind::Tmux => Arc::new(TmuxBackend::new(
            &config.session_name,
            &config.main_window,
            assistant_command,
        )),
        MuxBackendKind::Zellij => Arc::new(ZellijBackend::new(
            &config.session_name,
            &config.main_window,
            assistant_command,
        )),
    }
}

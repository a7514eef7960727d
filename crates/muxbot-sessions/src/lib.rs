//! Session state hub: window ↔ assistant-session ↔ topic bindings.
//!
//! Owns the three persisted maps (window states, per-chat read offsets,
//! thread bindings) plus the in-memory reverse index, and resolves
//! windows to transcript files on disk.

pub mod store;
pub mod types;

pub use store::SessionStore;
pub use types::{SessionHandle, UnreadInfo, WindowState};

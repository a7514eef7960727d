use thiserror::Error;

#[derive(Debug, Error)]
pub enum MuxbotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Multiplexer error: {0}")]
    Multiplexer(String),

    #[error("Window not found: {0}")]
    WindowNotFound(String),

    #[error("No session associated with window {0}")]
    NoSession(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, MuxbotError>;

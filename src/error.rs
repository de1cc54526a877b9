//! Error types for HawkEye
//!
//! The detection core never fails; these errors cover the edges around it
//! (JSON parsing, configuration loading, channel hand-off).

use thiserror::Error;

/// Errors raised at the boundaries of the engine
#[derive(Debug, Error)]
pub enum HawkeyeError {
    #[error("Failed to parse payload: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Sink rejected payload: {0}")]
    SinkError(String),
}

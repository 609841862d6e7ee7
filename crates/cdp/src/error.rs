//! Error types for the session core
//!
//! Simple, flat taxonomy. Four user-visible kinds, each carrying enough
//! context (method, session id, peer message) to diagnose a failure without
//! digging into internals.

use thiserror::Error;

use crate::protocol::SessionId;

/// Result type for session-core operations
pub type Result<T> = std::result::Result<T, CdpError>;

/// I/O-level failure on the channel to the browser process.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid endpoint url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("channel closed")]
    ChannelClosed,
}

#[derive(Debug, Error)]
pub enum CdpError {
    /// The frame never made it onto the wire.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The channel ended; every pending command fails with this.
    #[error("connection closed while handling {method}")]
    ConnectionClosed { method: String },

    /// Command issued on (or still pending in) a session that detached.
    #[error("session {session_id:?} detached while handling {method}")]
    SessionDetached {
        session_id: SessionId,
        method: String,
    },

    /// The browser answered the command with a structured error.
    #[error("{method} failed: {message} (code {code})")]
    Protocol {
        method: String,
        code: i64,
        message: String,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

//! Error types for the browser object graph
//!
//! Everything the session core reports passes through transparently; the
//! variants here cover only what the adapter layer itself can get wrong.

use thiserror::Error;

use cdp::CdpError;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error(transparent)]
    Cdp(#[from] CdpError),

    /// The browser answered, but not with the shape we needed.
    #[error("malformed {method} payload: {detail}")]
    InvalidPayload { method: String, detail: String },

    #[error("the default browser context cannot be disposed")]
    DefaultContext,

    /// The owning `Browser` handle is gone.
    #[error("browser disposed")]
    Disposed,
}

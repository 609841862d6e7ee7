//! CDP session and event multiplexing core
//!
//! One duplex transport to a browser process carries interleaved
//! command/response traffic and asynchronous events for many concurrently
//! open sessions - the browser itself, plus one per attached page, worker or
//! context target.
//!
//! # Architecture
//!
//! 1. **Single transport per connection**: every session shares the one
//!    WebSocket, no per-session connection overhead
//! 2. **Single dispatch path**: inbound frames are routed strictly in
//!    arrival order; callers suspend on their own completion slot and never
//!    block routing
//! 3. **Session tree**: attach notifications create child sessions before
//!    any frame referencing them is processed; detach cascades so children
//!    never outlive a parent
//! 4. **Fail fast and deterministically**: a dead channel fails every
//!    pending command at once - no silent timeouts

pub mod connection;
pub mod error;
pub mod protocol;
pub mod registry;
mod router;
pub mod session;
pub mod transport;

pub use connection::Connection;
pub use error::{CdpError, Result, TransportError};
pub use protocol::{
    AttachedToTargetParams, CdpCommand, CdpEvent, CdpMessage, CdpResponse, CdpResponseError,
    DetachedFromTargetParams, RequestId, SessionId, TargetId, TargetInfo,
};
pub use registry::ROOT_SESSION_ID;
pub use session::{EventHandler, ListenerId, Session, EVENT_DETACHED};
pub use transport::{
    pipe, PipePeer, PipeTransport, Transport, TransportEvent, TransportEvents, WebSocketTransport,
};

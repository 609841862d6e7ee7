//! Connection - the process-wide handle over one transport
//!
//! One dispatch task per connection processes inbound frames strictly in
//! arrival order. Command callers suspend on their own completion slot and
//! never touch the dispatch path, so a slow caller cannot stall another
//! session's traffic. Multiple connections share nothing and run fully in
//! parallel.

use std::sync::Arc;

use crate::error::Result;
use crate::protocol::SessionId;
use crate::router::Router;
use crate::session::Session;
use crate::transport::{Transport, TransportEvent, TransportEvents, WebSocketTransport};

/// Handle over one browser connection. Cheap to clone; all clones share the
/// same session tree.
#[derive(Clone)]
pub struct Connection {
    router: Arc<Router>,
}

impl Connection {
    /// Dial a DevTools WebSocket endpoint and start dispatching.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (transport, events) = WebSocketTransport::connect(ws_url).await?;
        Ok(Self::over(transport, events))
    }

    /// Drive the connection over a transport supplied by the embedder (a
    /// launcher's pipe, or [`crate::transport::pipe`] in tests).
    pub fn over(transport: Arc<dyn Transport>, mut events: TransportEvents) -> Self {
        let router = Router::new(transport);

        let dispatcher = router.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Message(frame) => dispatcher.dispatch(&frame),
                    TransportEvent::Closed(cause) => {
                        dispatcher.handle_close(cause);
                        break;
                    }
                }
            }
            // the channel may die without a close frame
            dispatcher.handle_close(None);
        });

        Self { router }
    }

    /// The browser-level session. Attached from construction until the
    /// connection closes.
    pub fn root_session(&self) -> Arc<Session> {
        self.router.root()
    }

    pub fn session(&self, id: &str) -> Option<Arc<Session>> {
        self.router.session(id)
    }

    /// Register a session whose attachment was reported in a command result
    /// (e.g. `Target.attachToTarget`, `Target.attachToBrowserTarget`) rather
    /// than an `attachedToTarget` event. Idempotent when the event arrived
    /// first.
    pub fn adopt(&self, session_id: impl Into<SessionId>, parent: &Session) -> Arc<Session> {
        self.router.attach_child(parent.id(), session_id.into())
    }

    pub fn is_closed(&self) -> bool {
        self.router.is_closed()
    }

    /// Cause of an abnormal close, if there was one.
    pub fn close_reason(&self) -> Option<String> {
        self.router.close_reason()
    }

    /// Commands still awaiting a response across all sessions.
    pub fn pending_count(&self) -> usize {
        self.router.pending_count()
    }

    /// Tear the connection down: every pending command across every session
    /// fails with `ConnectionClosed`, every session is marked detached, then
    /// the transport is shut.
    pub async fn close(&self) -> Result<()> {
        // local teardown first so no caller can observe a half-open state
        self.router.handle_close(None);
        self.router.transport().close().await?;
        Ok(())
    }
}

//! Message router - demultiplexes the shared inbound stream
//!
//! Design decisions:
//! 1. One monotonically increasing correlation counter per connection, never
//!    per session - global uniqueness with no wraparound hazard
//! 2. Responses resolve a oneshot recorded *before* the command hits the
//!    wire, so a fast peer cannot outrun the bookkeeping
//! 3. Unknown correlation ids and unknown session ids are dropped silently -
//!    both are expected races with detach, not errors
//! 4. Session-tree bookkeeping for attach/detach notifications happens in
//!    the same dispatch step that delivered them, before any subscriber runs
//!    (attach-before-use)

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{CdpError, Result};
use crate::protocol::{
    AttachedToTargetParams, CdpCommand, CdpEvent, CdpMessage, CdpResponse,
    DetachedFromTargetParams, RequestId, SessionId,
};
use crate::registry::{SessionRegistry, ROOT_SESSION_ID};
use crate::session::{Session, EVENT_DETACHED};
use crate::transport::Transport;

pub(crate) struct PendingRequest {
    session_id: SessionId,
    method: String,
    issued_at: Instant,
    tx: oneshot::Sender<Result<Value>>,
}

pub(crate) struct Router {
    next_id: AtomicU64,
    pending: DashMap<RequestId, PendingRequest>,
    registry: SessionRegistry,
    transport: Arc<dyn Transport>,
    closed: AtomicBool,
    close_reason: OnceLock<Option<String>>,
}

impl Router {
    pub(crate) fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        let router = Arc::new(Self {
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            registry: SessionRegistry::new(),
            transport,
            closed: AtomicBool::new(false),
            close_reason: OnceLock::new(),
        });
        router.registry.register(Session::root(Arc::downgrade(&router)));
        router
    }

    pub(crate) fn root(&self) -> Arc<Session> {
        // the root entry is registered at construction and never removed
        self.registry
            .lookup(ROOT_SESSION_ID)
            .expect("root session is always registered")
    }

    pub(crate) fn session(&self, id: &str) -> Option<Arc<Session>> {
        self.registry.lookup(id)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn close_reason(&self) -> Option<String> {
        self.close_reason.get().and_then(|cause| cause.clone())
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Allocate the next correlation id, record the pending slot under the
    /// session, and put the command on the wire. Completion is driven solely
    /// by [`Router::dispatch`].
    pub(crate) async fn issue_command(
        self: &Arc<Self>,
        session: &Session,
        method: &str,
        params: Option<Value>,
    ) -> Result<oneshot::Receiver<Result<Value>>> {
        if !session.is_attached() {
            return Err(CdpError::SessionDetached {
                session_id: session.id().to_string(),
                method: method.to_string(),
            });
        }
        if self.is_closed() {
            return Err(CdpError::ConnectionClosed {
                method: method.to_string(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let command = CdpCommand {
            id,
            method: method.to_string(),
            params,
            session_id: if session.is_root() {
                None
            } else {
                Some(session.id().to_string())
            },
        };
        let frame = serde_json::to_string(&command)?;

        let (tx, rx) = oneshot::channel();
        // record before sending so the response cannot outrun the bookkeeping
        self.pending.insert(
            id,
            PendingRequest {
                session_id: session.id().to_string(),
                method: method.to_string(),
                issued_at: Instant::now(),
                tx,
            },
        );
        session.track_pending(id);

        // a close that raced the insert above must not strand the entry
        if self.is_closed() {
            self.forget(id);
            return Err(CdpError::ConnectionClosed {
                method: method.to_string(),
            });
        }

        tracing::debug!(id, method, session_id = session.id(), "issuing command");
        if let Err(err) = self.transport.send(frame).await {
            self.forget(id);
            return Err(CdpError::Transport(err));
        }
        Ok(rx)
    }

    fn forget(&self, id: RequestId) {
        if let Some((_, pending)) = self.pending.remove(&id) {
            if let Some(session) = self.registry.lookup(&pending.session_id) {
                session.forget_pending(id);
            }
        }
    }

    /// Route one inbound frame. Runs on the connection's single dispatch
    /// task, strictly in arrival order.
    pub(crate) fn dispatch(self: &Arc<Self>, frame: &str) {
        let message: CdpMessage = match serde_json::from_str(frame) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "dropping unparseable frame");
                return;
            }
        };
        match message {
            CdpMessage::Response(response) => self.dispatch_response(response),
            CdpMessage::Event(event) => self.dispatch_event(event),
        }
    }

    fn dispatch_response(&self, response: CdpResponse) {
        let Some((_, pending)) = self.pending.remove(&response.id) else {
            // late reply after a detach or an abandoned wait
            tracing::debug!(id = response.id, "dropping response for unknown id");
            return;
        };
        if let Some(session) = self.registry.lookup(&pending.session_id) {
            session.forget_pending(response.id);
        }
        let PendingRequest {
            method, issued_at, tx, ..
        } = pending;
        let outcome = match response.error {
            Some(error) => Err(CdpError::Protocol {
                method,
                code: error.code,
                message: error.message,
            }),
            None => {
                tracing::debug!(
                    id = response.id,
                    elapsed = ?issued_at.elapsed(),
                    "command resolved"
                );
                Ok(response.result.unwrap_or(Value::Null))
            }
        };
        // the caller may have abandoned the wait; that is not our problem
        let _ = tx.send(outcome);
    }

    fn dispatch_event(self: &Arc<Self>, event: CdpEvent) {
        let session_id = event.session_id.as_deref().unwrap_or(ROOT_SESSION_ID);

        // tree bookkeeping first: a child session must exist before any
        // frame referencing it is processed, and a detached child must stop
        // routing before anything else sees the notification
        match event.method.as_str() {
            "Target.attachedToTarget" => {
                if let Some(params) = event.params.as_ref() {
                    match serde_json::from_value::<AttachedToTargetParams>(params.clone()) {
                        Ok(attach) => {
                            self.attach_child(session_id, attach.session_id);
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "malformed attachedToTarget params");
                        }
                    }
                }
            }
            "Target.detachedFromTarget" => {
                if let Some(params) = event.params.as_ref() {
                    match serde_json::from_value::<DetachedFromTargetParams>(params.clone()) {
                        Ok(detach) => self.detach_session(&detach.session_id, true),
                        Err(err) => {
                            tracing::warn!(error = %err, "malformed detachedFromTarget params");
                        }
                    }
                }
            }
            _ => {}
        }

        let Some(session) = self.registry.lookup(session_id) else {
            // expected race with a concurrent detach
            tracing::debug!(session_id, method = %event.method, "dropping event for unknown session");
            return;
        };
        let params = event.params.unwrap_or(Value::Null);
        session.emit(&event.method, &params);
    }

    /// Register a child session under `parent_id`, idempotently.
    pub(crate) fn attach_child(self: &Arc<Self>, parent_id: &str, child_id: SessionId) -> Arc<Session> {
        if let Some(existing) = self.registry.lookup(&child_id) {
            return existing;
        }
        tracing::debug!(parent_id, child_id = %child_id, "session attached");
        let child = Session::child(
            child_id.clone(),
            Some(parent_id.to_string()),
            Arc::downgrade(self),
        );
        self.registry.register(child.clone());
        if let Some(parent) = self.registry.lookup(parent_id) {
            parent.add_child(child_id);
        }
        // an attach that raced a close must not accept commands
        if self.is_closed() {
            child.mark_detached();
        }
        child
    }

    /// Terminal detach: fail the session's outstanding commands, cascade to
    /// descendants, optionally raise the `detached` lifecycle event, prune
    /// the registry entry. Idempotent.
    pub(crate) fn detach_session(self: &Arc<Self>, id: &str, emit_lifecycle: bool) {
        let Some(session) = self.registry.lookup(id) else {
            return;
        };
        if !session.mark_detached() {
            return;
        }
        tracing::debug!(session_id = id, "session detached");

        for request_id in session.take_pending() {
            if let Some((_, pending)) = self.pending.remove(&request_id) {
                let PendingRequest { method, tx, .. } = pending;
                let _ = tx.send(Err(CdpError::SessionDetached {
                    session_id: id.to_string(),
                    method,
                }));
            }
        }

        // children never outlive a detached parent
        for child_id in session.take_children() {
            self.detach_session(&child_id, emit_lifecycle);
        }

        if emit_lifecycle {
            session.emit(EVENT_DETACHED, &Value::Null);
        }

        if !session.is_root() {
            self.registry.remove(id);
            if let Some(parent_id) = session.parent_id() {
                if let Some(parent) = self.registry.lookup(parent_id) {
                    parent.forget_child(id);
                }
            }
        }
    }

    /// The channel ended: fail every outstanding command across every
    /// session with `ConnectionClosed` and mark the whole tree detached,
    /// without raising per-session detach events. Idempotent.
    pub(crate) fn handle_close(&self, cause: Option<String>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.close_reason.set(cause.clone());
        tracing::info!(?cause, pending = self.pending.len(), "connection closed");

        let ids: Vec<RequestId> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let PendingRequest { method, tx, .. } = pending;
                let _ = tx.send(Err(CdpError::ConnectionClosed { method }));
            }
        }

        self.registry.for_each(|session| {
            session.mark_detached();
            session.clear_pending();
        });
    }
}

//! Session - one logical attach point within a connection
//!
//! A session is a view over the shared transport keyed by its wire id: the
//! root session (browser level) and one child per attached target. It owns
//! command invocation, event subscription and its own attached/detached
//! lifecycle; the router owns message flow.
//!
//! Lifecycle is `Attached -> Detached`, terminal. A detached session holds
//! no pending requests and accepts no new commands.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use dashmap::DashMap;
use serde_json::{json, Value};

use crate::error::{CdpError, Result};
use crate::protocol::{RequestId, SessionId};
use crate::registry::ROOT_SESSION_ID;
use crate::router::Router;

/// Listener method name for a session's own detach notification, raised
/// exactly once when the session leaves the tree.
pub const EVENT_DETACHED: &str = "detached";

/// Event callback. Runs synchronously on the dispatch path; must not block.
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle returned by [`Session::on`]; [`Session::off`] removes by handle
/// identity, never by comparing closures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    handler: EventHandler,
}

pub struct Session {
    id: SessionId,
    parent_id: Option<SessionId>,
    router: Weak<Router>,
    attached: AtomicBool,
    /// Correlation ids of this session's in-flight commands, oldest first.
    pending: Mutex<BTreeSet<RequestId>>,
    children: Mutex<Vec<SessionId>>,
    /// Method name -> listeners in registration order.
    listeners: DashMap<String, Vec<Listener>>,
    next_listener_id: AtomicU64,
}

impl Session {
    pub(crate) fn root(router: Weak<Router>) -> Arc<Self> {
        Self::build(ROOT_SESSION_ID.to_string(), None, router)
    }

    pub(crate) fn child(
        id: SessionId,
        parent_id: Option<SessionId>,
        router: Weak<Router>,
    ) -> Arc<Self> {
        Self::build(id, parent_id, router)
    }

    fn build(id: SessionId, parent_id: Option<SessionId>, router: Weak<Router>) -> Arc<Self> {
        Arc::new(Self {
            id,
            parent_id,
            router,
            attached: AtomicBool::new(true),
            pending: Mutex::new(BTreeSet::new()),
            children: Mutex::new(Vec::new()),
            listeners: DashMap::new(),
            next_listener_id: AtomicU64::new(1),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_SESSION_ID
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    /// Send a command through this session and wait for its result.
    ///
    /// Resolves exactly once: the protocol result, a [`CdpError::Protocol`]
    /// the browser reported, or [`CdpError::SessionDetached`] /
    /// [`CdpError::ConnectionClosed`] when the session or channel went away
    /// first. Callers may abandon the wait (`tokio::time::timeout`) without
    /// disturbing bookkeeping; the pending entry is reclaimed when the late
    /// response eventually arrives.
    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let router = self.router(method)?;
        let completion = router.issue_command(self, method, params).await?;
        match completion.await {
            Ok(outcome) => outcome,
            // resolver dropped without answering; only happens mid-shutdown
            Err(_) => Err(CdpError::ConnectionClosed {
                method: method.to_string(),
            }),
        }
    }

    /// Register `handler` for `method` events on this session.
    ///
    /// Contract: registration order is delivery order, and registering the
    /// *same* handler (`Arc::ptr_eq`) twice for one method is idempotent -
    /// at most one firing per distinct handler per event. A fresh `Arc`
    /// around an identical closure counts as a distinct handler.
    pub fn on(&self, method: &str, handler: EventHandler) -> ListenerId {
        let mut listeners = self.listeners.entry(method.to_string()).or_default();
        if let Some(existing) = listeners
            .iter()
            .find(|listener| Arc::ptr_eq(&listener.handler, &handler))
        {
            return existing.id;
        }
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::SeqCst));
        listeners.push(Listener { id, handler });
        id
    }

    /// Remove one registration by handle. Returns whether anything was
    /// removed; the handler sees no further events once this returns.
    pub fn off(&self, method: &str, id: ListenerId) -> bool {
        match self.listeners.get_mut(method) {
            Some(mut listeners) => {
                let before = listeners.len();
                listeners.retain(|listener| listener.id != id);
                before != listeners.len()
            }
            None => false,
        }
    }

    /// Detach this session: fail its outstanding commands with
    /// [`CdpError::SessionDetached`], cascade to every descendant, and raise
    /// [`EVENT_DETACHED`] to subscribers exactly once - all before this
    /// returns. Fails if the session is already detached.
    ///
    /// Non-root sessions also notify the browser via
    /// `Target.detachFromTarget`, fire-and-forget: the local teardown is
    /// authoritative and never waits on the wire.
    pub async fn detach(&self) -> Result<()> {
        if !self.is_attached() {
            return Err(CdpError::SessionDetached {
                session_id: self.id.clone(),
                method: "Target.detachFromTarget".to_string(),
            });
        }
        let router = self.router("Target.detachFromTarget")?;

        if !self.is_root() {
            let root = router.root();
            match router
                .issue_command(
                    &root,
                    "Target.detachFromTarget",
                    Some(json!({ "sessionId": self.id })),
                )
                .await
            {
                // the response reclaims the pending slot; nobody waits on it
                Ok(_completion) => {}
                Err(err) => {
                    tracing::debug!(session_id = %self.id, error = %err, "detach notification not sent");
                }
            }
        }

        router.detach_session(&self.id, true);
        Ok(())
    }

    /// In-flight command count, for diagnostics.
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    fn router(&self, method: &str) -> Result<Arc<Router>> {
        self.router.upgrade().ok_or_else(|| CdpError::ConnectionClosed {
            method: method.to_string(),
        })
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, BTreeSet<RequestId>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_children(&self) -> std::sync::MutexGuard<'_, Vec<SessionId>> {
        self.children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -- router-side bookkeeping --------------------------------------------

    /// Terminal transition; returns false if the session was already
    /// detached (the exactly-once guard for detach work).
    pub(crate) fn mark_detached(&self) -> bool {
        self.attached.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn track_pending(&self, id: RequestId) {
        self.lock_pending().insert(id);
    }

    pub(crate) fn forget_pending(&self, id: RequestId) {
        self.lock_pending().remove(&id);
    }

    pub(crate) fn take_pending(&self) -> Vec<RequestId> {
        let mut pending = self.lock_pending();
        let drained: Vec<RequestId> = pending.iter().copied().collect();
        pending.clear();
        drained
    }

    pub(crate) fn clear_pending(&self) {
        self.lock_pending().clear();
    }

    pub(crate) fn add_child(&self, id: SessionId) {
        self.lock_children().push(id);
    }

    pub(crate) fn forget_child(&self, id: &str) {
        self.lock_children().retain(|child| child != id);
    }

    pub(crate) fn take_children(&self) -> Vec<SessionId> {
        std::mem::take(&mut *self.lock_children())
    }

    /// Invoke subscribers for `method` in registration order. The listener
    /// table is released before any handler runs, so handlers may call
    /// `on`/`off` freely.
    pub(crate) fn emit(&self, method: &str, params: &Value) {
        let handlers: Vec<EventHandler> = match self.listeners.get(method) {
            Some(listeners) => listeners
                .iter()
                .map(|listener| listener.handler.clone())
                .collect(),
            None => return,
        };
        for handler in handlers {
            handler(params);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::transport::{pipe, PipePeer};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn connect() -> (Connection, PipePeer) {
        let (transport, events, peer) = pipe();
        (Connection::over(transport, events), peer)
    }

    async fn next_command(peer: &mut PipePeer) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(1), peer.next_outbound())
            .await
            .expect("command within deadline")
            .expect("transport open");
        serde_json::from_str(&frame).unwrap()
    }

    async fn wait_for_session(conn: &Connection, id: &str) -> Arc<Session> {
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Some(session) = conn.session(id) {
                    return session;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("session attach within deadline")
    }

    fn attach_event(parent: Option<&str>, child: &str) -> String {
        let mut event = json!({
            "method": "Target.attachedToTarget",
            "params": {
                "sessionId": child,
                "targetInfo": {
                    "targetId": format!("target-{child}"),
                    "type": "page",
                    "title": "",
                    "url": "about:blank",
                    "attached": true
                },
                "waitingForDebugger": false
            }
        });
        if let Some(parent) = parent {
            event["sessionId"] = json!(parent);
        }
        event.to_string()
    }

    #[tokio::test]
    async fn duplicate_handler_registration_is_idempotent() {
        let (conn, peer) = connect();
        let root = conn.root_session();

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let handler: EventHandler = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let first = root.on("Target.targetCreated", handler.clone());
        let second = root.on("Target.targetCreated", handler.clone());
        assert_eq!(first, second);

        peer.deliver(
            json!({"method": "Target.targetCreated", "params": {"targetInfo": {}}}).to_string(),
        );
        tokio::time::timeout(Duration::from_secs(1), async {
            while hits.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("event delivered");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn off_stops_delivery_by_handle() {
        let (conn, peer) = connect();
        let root = conn.root_session();

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let id = root.on(
            "Network.requestWillBeSent",
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        peer.deliver(json!({"method": "Network.requestWillBeSent", "params": {}}).to_string());
        tokio::time::timeout(Duration::from_secs(1), async {
            while hits.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("first event delivered");

        assert!(root.off("Network.requestWillBeSent", id));
        assert!(!root.off("Network.requestWillBeSent", id));

        // subsequent events bypass the removed listener; prove the loop is
        // still alive with a round trip afterwards
        peer.deliver(json!({"method": "Network.requestWillBeSent", "params": {}}).to_string());
        let call = tokio::spawn({
            let root = root.clone();
            async move { root.send("Browser.getVersion", None).await }
        });
        let mut peer = peer;
        let command = next_command(&mut peer).await;
        peer.deliver(json!({"id": command["id"], "result": {}}).to_string());
        call.await.unwrap().unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn detach_fails_outstanding_and_cascades() {
        let (conn, mut peer) = connect();

        peer.deliver(attach_event(None, "parent-1"));
        let parent = wait_for_session(&conn, "parent-1").await;
        peer.deliver(attach_event(Some("parent-1"), "child-1"));
        let child = wait_for_session(&conn, "child-1").await;

        let parent_detached = Arc::new(AtomicUsize::new(0));
        let child_detached = Arc::new(AtomicUsize::new(0));
        {
            let counter = parent_detached.clone();
            parent.on(
                EVENT_DETACHED,
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            );
            let counter = child_detached.clone();
            child.on(
                EVENT_DETACHED,
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        let parent_call = tokio::spawn({
            let parent = parent.clone();
            async move { parent.send("Page.enable", None).await }
        });
        let child_call = tokio::spawn({
            let child = child.clone();
            async move { child.send("Runtime.enable", None).await }
        });
        // both commands on the wire before we detach
        next_command(&mut peer).await;
        next_command(&mut peer).await;

        parent.detach().await.unwrap();

        assert!(matches!(
            parent_call.await.unwrap(),
            Err(CdpError::SessionDetached { ref session_id, .. }) if session_id == "parent-1"
        ));
        assert!(matches!(
            child_call.await.unwrap(),
            Err(CdpError::SessionDetached { ref session_id, .. }) if session_id == "child-1"
        ));

        assert!(!parent.is_attached());
        assert!(!child.is_attached());
        assert!(conn.session("parent-1").is_none());
        assert!(conn.session("child-1").is_none());
        assert_eq!(parent_detached.load(Ordering::SeqCst), 1);
        assert_eq!(child_detached.load(Ordering::SeqCst), 1);

        // the browser was told, fire-and-forget
        let notify = next_command(&mut peer).await;
        assert_eq!(notify["method"], "Target.detachFromTarget");
        assert_eq!(notify["params"]["sessionId"], "parent-1");

        assert!(matches!(
            parent.detach().await,
            Err(CdpError::SessionDetached { .. })
        ));
        assert!(matches!(
            child.send("Runtime.enable", None).await,
            Err(CdpError::SessionDetached { .. })
        ));
    }

    #[tokio::test]
    async fn root_detach_cascades_without_closing_the_connection() {
        let (conn, peer) = connect();

        peer.deliver(attach_event(None, "s-child"));
        let child = wait_for_session(&conn, "s-child").await;
        let root = conn.root_session();

        // a purely local teardown; no wire command for root
        root.detach().await.unwrap();

        assert!(!root.is_attached());
        assert!(!child.is_attached());
        assert!(!conn.is_closed());

        assert!(matches!(
            child.send("Runtime.enable", None).await,
            Err(CdpError::SessionDetached { ref session_id, .. }) if session_id == "s-child"
        ));
        assert!(matches!(
            root.send("Browser.getVersion", None).await,
            Err(CdpError::SessionDetached { .. })
        ));
    }

    #[tokio::test]
    async fn abandoned_wait_leaks_nothing() {
        let (conn, mut peer) = connect();
        let root = conn.root_session();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            root.send("Browser.getVersion", None),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(conn.pending_count(), 1);
        assert_eq!(root.pending_count(), 1);

        // the late response reclaims the slot instead of leaking it
        let command = next_command(&mut peer).await;
        peer.deliver(json!({"id": command["id"], "result": {}}).to_string());
        tokio::time::timeout(Duration::from_secs(1), async {
            while conn.pending_count() != 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("pending entry reclaimed");
        assert_eq!(root.pending_count(), 0);
    }
}

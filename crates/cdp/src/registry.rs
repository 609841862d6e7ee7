//! Session tree registry
//!
//! Pure lookup structure: id-indexed entries with parent-id back-references
//! on the sessions themselves. No business logic lives here; cascading
//! detach (driven by the router) guarantees descendants never outlive a
//! removed parent.

use std::sync::Arc;

use dashmap::DashMap;

use crate::protocol::SessionId;
use crate::session::Session;

/// Reserved identifier for the root (browser-level) session. Wire frames
/// without a `sessionId` address this session.
pub const ROOT_SESSION_ID: &str = "";

pub(crate) struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub(crate) fn register(&self, session: Arc<Session>) {
        self.sessions.insert(session.id().to_string(), session);
    }

    pub(crate) fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub(crate) fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    pub(crate) fn for_each(&self, mut f: impl FnMut(&Arc<Session>)) {
        for entry in self.sessions.iter() {
            f(entry.value());
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.sessions.len()
    }
}

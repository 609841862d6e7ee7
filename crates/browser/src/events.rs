//! Lifecycle notifications for the object graph
//!
//! Typed events published whenever the target adapter changes the
//! Browser/BrowserContext/Page graph. Consumers (navigation helpers,
//! monitors, embedders) subscribe through a broadcast channel; publishing
//! never blocks and never fails when nobody listens.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Graph changes observed by external callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LifecycleEvent {
    ContextCreated { context_id: String },
    ContextDestroyed { context_id: String },
    PageCreated { target_id: String },
    PageClosed { target_id: String },
    TargetInfoChanged { target_id: String, url: String, title: String },
}

/// Broadcast bus for lifecycle notifications.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Publish an event. No subscribers is fine.
    pub fn publish(&self, event: LifecycleEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

//! Target lifecycle adapter
//!
//! Translates raw `Target.*` notifications on the root session into the
//! externally observed object graph: a discovered-target table and the set
//! of live pages, with typed notifications on the lifecycle bus. This is
//! the only place protocol session ids map to public API objects.
//!
//! Handlers run synchronously on the connection's dispatch path, so they
//! stick to map upkeep and broadcast sends - nothing blocking. They hold
//! the index weakly; once the owning `Browser` drops, they become no-ops.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use cdp::{
    AttachedToTargetParams, Connection, DetachedFromTargetParams, Session, TargetId, TargetInfo,
};

use crate::events::{EventBus, LifecycleEvent};
use crate::page::Page;

pub(crate) struct TargetIndex {
    conn: Connection,
    /// Every target the browser has announced, attached or not.
    targets: DashMap<TargetId, TargetInfo>,
    /// Live pages keyed by target id.
    pages: DashMap<TargetId, Arc<Page>>,
    bus: EventBus,
}

impl TargetIndex {
    pub(crate) fn new(conn: Connection, bus: EventBus) -> Arc<Self> {
        Arc::new(Self {
            conn,
            targets: DashMap::new(),
            pages: DashMap::new(),
            bus,
        })
    }

    /// Subscribe the adapter on the root session.
    pub(crate) fn install(self: &Arc<Self>) {
        let root = self.conn.root_session();

        let index = Arc::downgrade(self);
        root.on(
            "Target.targetCreated",
            Arc::new(move |params| {
                let Some(index) = index.upgrade() else { return };
                let Some(info) = decode_target_info(params) else { return };
                tracing::debug!(target_id = %info.target_id, kind = %info.target_type, "target discovered");
                index.targets.insert(info.target_id.clone(), info);
            }),
        );

        let index = Arc::downgrade(self);
        root.on(
            "Target.targetInfoChanged",
            Arc::new(move |params| {
                let Some(index) = index.upgrade() else { return };
                let Some(info) = decode_target_info(params) else { return };
                if let Some(page) = index.pages.get(&info.target_id) {
                    page.update_info(&info);
                    index.bus.publish(LifecycleEvent::TargetInfoChanged {
                        target_id: info.target_id.clone(),
                        url: info.url.clone(),
                        title: info.title.clone(),
                    });
                }
                index.targets.insert(info.target_id.clone(), info);
            }),
        );

        let index = Arc::downgrade(self);
        root.on(
            "Target.targetDestroyed",
            Arc::new(move |params| {
                let Some(index) = index.upgrade() else { return };
                let Some(target_id) = params.get("targetId").and_then(Value::as_str) else {
                    return;
                };
                index.targets.remove(target_id);
                if index.pages.remove(target_id).is_some() {
                    index.bus.publish(LifecycleEvent::PageClosed {
                        target_id: target_id.to_string(),
                    });
                }
            }),
        );

        // the session core registered the child before this handler runs;
        // here we only project the public graph
        let index = Arc::downgrade(self);
        root.on(
            "Target.attachedToTarget",
            Arc::new(move |params| {
                let Some(index) = index.upgrade() else { return };
                let Ok(attach) = serde_json::from_value::<AttachedToTargetParams>(params.clone())
                else {
                    return;
                };
                if attach.target_info.target_type != "page" {
                    return;
                }
                let Some(session) = index.conn.session(&attach.session_id) else {
                    return;
                };
                index.adopt_page(attach.target_info, session);
            }),
        );

        let index = Arc::downgrade(self);
        root.on(
            "Target.detachedFromTarget",
            Arc::new(move |params| {
                let Some(index) = index.upgrade() else { return };
                let Ok(detach) = serde_json::from_value::<DetachedFromTargetParams>(params.clone())
                else {
                    return;
                };
                let target_id = detach.target_id.or_else(|| {
                    index
                        .pages
                        .iter()
                        .find(|entry| entry.value().session().id() == detach.session_id)
                        .map(|entry| entry.key().clone())
                });
                if let Some(target_id) = target_id {
                    if index.pages.remove(&target_id).is_some() {
                        index.bus.publish(LifecycleEvent::PageClosed { target_id });
                    }
                }
            }),
        );
    }

    /// Project a page into the graph, once. The attach event and the
    /// explicit `Target.attachToTarget` reply both land here; whichever
    /// comes second finds the existing entry.
    pub(crate) fn adopt_page(&self, info: TargetInfo, session: Arc<Session>) -> Arc<Page> {
        if let Some(existing) = self.pages.get(&info.target_id) {
            return existing.clone();
        }
        let target_id = info.target_id.clone();
        tracing::debug!(target_id = %target_id, session_id = session.id(), "page attached");
        let page = Arc::new(Page::new(
            info.clone(),
            session,
            self.conn.root_session(),
        ));
        self.targets.insert(target_id.clone(), info);
        self.pages.insert(target_id.clone(), page.clone());
        self.bus.publish(LifecycleEvent::PageCreated { target_id });
        page
    }

    pub(crate) fn page(&self, target_id: &str) -> Option<Arc<Page>> {
        self.pages.get(target_id).map(|entry| entry.value().clone())
    }

    pub(crate) fn pages(&self) -> Vec<Arc<Page>> {
        self.pages
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub(crate) fn targets(&self) -> Vec<TargetInfo> {
        self.targets
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

fn decode_target_info(params: &Value) -> Option<TargetInfo> {
    let info = params.get("targetInfo")?;
    match serde_json::from_value(info.clone()) {
        Ok(info) => Some(info),
        Err(err) => {
            tracing::warn!(error = %err, "malformed targetInfo payload");
            None
        }
    }
}

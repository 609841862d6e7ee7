//! Browser - the top of the object graph
//!
//! One `Browser` per connection. Attaching bootstraps target discovery and
//! flattened auto-attach, installs the lifecycle adapter on the root
//! session, and from then on the graph tracks whatever the browser reports.
//! Process launch and executable discovery are someone else's job; this
//! layer starts from a ready transport.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use cdp::{Connection, Session, TargetInfo};

use crate::context::BrowserContext;
use crate::error::{BrowserError, Result};
use crate::events::{EventBus, LifecycleEvent};
use crate::page::Page;
use crate::targets::TargetIndex;

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Diagnostic identity, stamped into log lines.
    pub id: String,
    pub ws_url: String,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            ws_url: "ws://localhost:9222/devtools/browser".to_string(),
        }
    }
}

/// Typed `Browser.getVersion` result.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserVersion {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub product: String,
    #[serde(default)]
    pub revision: String,
    #[serde(rename = "userAgent")]
    pub user_agent: String,
    #[serde(rename = "jsVersion", default)]
    pub js_version: String,
}

pub struct Browser {
    config: BrowserConfig,
    conn: Connection,
    pub event_bus: EventBus,
    index: Arc<TargetIndex>,
    contexts: DashMap<String, Arc<BrowserContext>>,
}

impl Browser {
    /// Dial the configured endpoint and attach.
    pub async fn connect(config: BrowserConfig) -> Result<Arc<Self>> {
        let conn = Connection::connect(&config.ws_url).await?;
        Self::attach(conn, config).await
    }

    /// Attach over an established connection (a launcher or embedder
    /// supplied the transport).
    pub async fn attach(conn: Connection, config: BrowserConfig) -> Result<Arc<Self>> {
        let event_bus = EventBus::new();
        let index = TargetIndex::new(conn.clone(), event_bus.clone());
        index.install();

        let browser = Arc::new(Self {
            config,
            conn,
            event_bus,
            index,
            contexts: DashMap::new(),
        });
        browser.bootstrap().await?;
        Ok(browser)
    }

    async fn bootstrap(&self) -> Result<()> {
        let root = self.conn.root_session();
        root.send("Target.setDiscoverTargets", Some(json!({ "discover": true })))
            .await?;
        root.send(
            "Target.setAutoAttach",
            Some(json!({
                "autoAttach": true,
                "waitForDebuggerOnStart": false,
                "flatten": true,
            })),
        )
        .await?;
        tracing::info!(id = %self.config.id, "browser attached");
        Ok(())
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub async fn version(&self) -> Result<BrowserVersion> {
        let result = self
            .conn
            .root_session()
            .send("Browser.getVersion", None)
            .await?;
        serde_json::from_value(result).map_err(|err| BrowserError::InvalidPayload {
            method: "Browser.getVersion".to_string(),
            detail: err.to_string(),
        })
    }

    /// Create an isolated context.
    pub async fn new_context(self: &Arc<Self>) -> Result<Arc<BrowserContext>> {
        let result = self
            .conn
            .root_session()
            .send("Target.createBrowserContext", None)
            .await?;
        let context_id = result
            .get("browserContextId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::InvalidPayload {
                method: "Target.createBrowserContext".to_string(),
                detail: "missing browserContextId".to_string(),
            })?
            .to_string();

        let context = BrowserContext::new(Some(context_id.clone()), Arc::downgrade(self));
        self.contexts.insert(context_id.clone(), context.clone());
        self.event_bus
            .publish(LifecycleEvent::ContextCreated { context_id });
        Ok(context)
    }

    /// The browser's default context.
    pub fn default_context(self: &Arc<Self>) -> Arc<BrowserContext> {
        BrowserContext::new(None, Arc::downgrade(self))
    }

    /// An additional browser-level protocol session, adopted into the tree
    /// as a child of root. Useful for isolating a consumer's event traffic
    /// (discovery, tracing) from the main control session.
    pub async fn new_browser_session(&self) -> Result<Arc<Session>> {
        let root = self.conn.root_session();
        let result = root.send("Target.attachToBrowserTarget", None).await?;
        let session_id = result
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::InvalidPayload {
                method: "Target.attachToBrowserTarget".to_string(),
                detail: "missing sessionId".to_string(),
            })?;
        Ok(self.conn.adopt(session_id, &root))
    }

    pub fn page(&self, target_id: &str) -> Option<Arc<Page>> {
        self.index.page(target_id)
    }

    pub fn pages(&self) -> Vec<Arc<Page>> {
        self.index.pages()
    }

    /// Every target the browser has announced, attached or not.
    pub fn targets(&self) -> Vec<TargetInfo> {
        self.index.targets()
    }

    /// Contexts created through this handle and not yet disposed.
    pub fn contexts(&self) -> Vec<Arc<BrowserContext>> {
        self.contexts
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Ask the browser to exit, then tear the connection down. Pending
    /// commands across all sessions fail deterministically.
    pub async fn close(&self) -> Result<()> {
        // best effort; the browser may exit before acknowledging
        if let Err(err) = self.conn.root_session().send("Browser.close", None).await {
            tracing::debug!(error = %err, "Browser.close not acknowledged");
        }
        self.conn.close().await?;
        Ok(())
    }

    pub(crate) fn adopt_page(&self, info: TargetInfo, session: Arc<Session>) -> Arc<Page> {
        self.index.adopt_page(info, session)
    }

    pub(crate) fn forget_context(&self, context_id: &str) {
        if self.contexts.remove(context_id).is_some() {
            self.event_bus.publish(LifecycleEvent::ContextDestroyed {
                context_id: context_id.to_string(),
            });
        }
    }
}

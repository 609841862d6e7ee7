//! Page - a page target bound to its own child session
//!
//! Thin passthroughs over `Session::send`; this is the seam the excluded
//! high-level helpers (navigation waiting, input simulation, emulation)
//! call through. No waiting conveniences live here.

use std::sync::{Arc, RwLock};

use serde_json::{json, Value};

use cdp::{Session, TargetInfo};

use crate::error::Result;

pub struct Page {
    session: Arc<Session>,
    /// Root session, for browser-level commands about this target.
    root: Arc<Session>,
    info: RwLock<TargetInfo>,
}

impl Page {
    pub(crate) fn new(info: TargetInfo, session: Arc<Session>, root: Arc<Session>) -> Self {
        Self {
            session,
            root,
            info: RwLock::new(info),
        }
    }

    pub fn target_id(&self) -> String {
        self.info().target_id.clone()
    }

    pub fn context_id(&self) -> Option<String> {
        self.info().browser_context_id.clone()
    }

    pub fn url(&self) -> String {
        self.info().url.clone()
    }

    pub fn title(&self) -> String {
        self.info().title.clone()
    }

    /// The child session carrying this page's traffic.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Enable a protocol domain; most domains emit nothing until enabled.
    pub async fn enable_domain(&self, domain: &str) -> Result<()> {
        self.session.send(&format!("{domain}.enable"), None).await?;
        Ok(())
    }

    pub async fn navigate(&self, url: &str) -> Result<Value> {
        let result = self
            .session
            .send("Page.navigate", Some(json!({ "url": url })))
            .await?;
        Ok(result)
    }

    pub async fn reload(&self) -> Result<()> {
        self.session.send("Page.reload", None).await?;
        Ok(())
    }

    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .session
            .send(
                "Runtime.evaluate",
                Some(json!({
                    "expression": expression,
                    "returnByValue": true,
                })),
            )
            .await?;
        Ok(result)
    }

    /// Ask the browser to close the target. Teardown of the page's session
    /// arrives as `Target.detachedFromTarget` on the usual event path.
    pub async fn close(&self) -> Result<bool> {
        let result = self
            .root
            .send(
                "Target.closeTarget",
                Some(json!({ "targetId": self.target_id() })),
            )
            .await?;
        Ok(result
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    pub(crate) fn update_info(&self, info: &TargetInfo) {
        *self.write_info() = info.clone();
    }

    fn info(&self) -> std::sync::RwLockReadGuard<'_, TargetInfo> {
        self.info.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_info(&self) -> std::sync::RwLockWriteGuard<'_, TargetInfo> {
        self.info
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

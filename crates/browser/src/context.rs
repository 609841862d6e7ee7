//! BrowserContext - an isolated cookie/cache/storage universe
//!
//! Contexts own pages; `None` is the browser's default context. All traffic
//! routes through the root session - contexts have no session of their own.

use std::sync::{Arc, Weak};

use serde_json::{json, Value};

use cdp::TargetInfo;

use crate::browser::Browser;
use crate::error::{BrowserError, Result};
use crate::page::Page;

pub struct BrowserContext {
    id: Option<String>,
    browser: Weak<Browser>,
}

impl BrowserContext {
    pub(crate) fn new(id: Option<String>, browser: Weak<Browser>) -> Arc<Self> {
        Arc::new(Self { id, browser })
    }

    /// `None` for the default context.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Create a page target in this context and attach to it.
    ///
    /// The attach is explicit (`Target.attachToTarget` with `flatten`) so
    /// the session is in hand when this returns; if the browser's
    /// auto-attach won the race, adoption finds the existing entry.
    pub async fn new_page(&self, url: Option<&str>) -> Result<Arc<Page>> {
        let browser = self.browser()?;
        let root = browser.connection().root_session();
        let url = url.unwrap_or("about:blank");

        let mut params = json!({ "url": url });
        if let Some(id) = &self.id {
            params["browserContextId"] = json!(id);
        }
        let created = root.send("Target.createTarget", Some(params)).await?;
        let target_id = created
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::InvalidPayload {
                method: "Target.createTarget".to_string(),
                detail: "missing targetId".to_string(),
            })?
            .to_string();

        let attached = root
            .send(
                "Target.attachToTarget",
                Some(json!({ "targetId": target_id, "flatten": true })),
            )
            .await?;
        let session_id = attached
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::InvalidPayload {
                method: "Target.attachToTarget".to_string(),
                detail: "missing sessionId".to_string(),
            })?;
        let session = browser.connection().adopt(session_id, &root);

        let info = TargetInfo {
            target_id: target_id.clone(),
            target_type: "page".to_string(),
            title: String::new(),
            url: url.to_string(),
            attached: true,
            browser_context_id: self.id.clone(),
        };
        Ok(browser.adopt_page(info, session))
    }

    /// Pages currently alive in this context.
    pub fn pages(&self) -> Vec<Arc<Page>> {
        match self.browser.upgrade() {
            Some(browser) => browser
                .pages()
                .into_iter()
                .filter(|page| page.context_id().as_deref() == self.id.as_deref())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Dispose the context and every target in it. The default context is
    /// not disposable.
    pub async fn dispose(&self) -> Result<()> {
        let Some(id) = &self.id else {
            return Err(BrowserError::DefaultContext);
        };
        let browser = self.browser()?;
        browser
            .connection()
            .root_session()
            .send(
                "Target.disposeBrowserContext",
                Some(json!({ "browserContextId": id })),
            )
            .await?;
        browser.forget_context(id);
        Ok(())
    }

    fn browser(&self) -> Result<Arc<Browser>> {
        self.browser.upgrade().ok_or(BrowserError::Disposed)
    }
}

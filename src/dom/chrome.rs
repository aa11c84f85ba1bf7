//! [`Dom`] backed by a real Chrome tab through `headless_chrome`.
//!
//! Every call evaluates a small script in the page. `headless_chrome` is
//! blocking, so calls hop onto tokio's blocking pool. Chrome has no push
//! channel for mutations here, so [`ChromeDom::observe`] returns `None` and the
//! resolver polls.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;

use super::{Dom, ElementHandle, LocationChange, Mutation};
use crate::position::{Rect, Viewport};

/// A browser session the tour drives. Created once, reused for the whole tour.
pub struct ChromeDom {
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeDom {
    /// Attach to a Chrome already listening for DevTools at `debug_url`
    /// (e.g. `http://127.0.0.1:9222`), reusing its first tab.
    pub fn attach(debug_url: &str) -> Result<Self> {
        tracing::info!(%debug_url, "attaching to existing Chrome");
        let browser = Browser::connect(debug_url.to_string())
            .map_err(|e| anyhow!("could not attach to Chrome at {debug_url}: {e}"))?;

        let existing = {
            let tabs = browser
                .get_tabs()
                .lock()
                .map_err(|_| anyhow!("Chrome tab list lock poisoned"))?;
            tabs.first().cloned()
        };
        let tab = match existing {
            Some(tab) => tab,
            None => browser.new_tab()?,
        };

        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    /// Launch a fresh Chrome and open `url` in a new tab.
    pub fn launch(url: &str, headless: bool) -> Result<Self> {
        tracing::info!(%url, headless, "launching Chrome");
        let options = LaunchOptions {
            headless,
            ..Default::default()
        };
        let browser = Browser::new(options).map_err(|e| anyhow!("browser launch failed: {e}"))?;
        let tab = browser.new_tab()?;
        tab.navigate_to(url)?;
        tab.wait_for_element("body")?;

        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    pub fn tab(&self) -> &Arc<Tab> {
        &self.tab
    }

    async fn eval<T>(&self, script: String) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || {
            let result = tab.evaluate(&script, false)?;
            let value = result.value.unwrap_or(serde_json::Value::Null);
            serde_json::from_value(value).context("unexpected script result")
        })
        .await
        .map_err(|e| anyhow!("script task panicked: {e}"))?
    }
}

/// JS string literal for a selector, quoted and escaped.
fn js_str(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

#[async_trait]
impl Dom for ChromeDom {
    async fn query(&self, selector: &str) -> Result<Option<ElementHandle>> {
        let found: bool = self
            .eval(format!("document.querySelector({}) !== null", js_str(selector)))
            .await?;
        Ok(found.then(|| ElementHandle::new(selector)))
    }

    fn observe(&self) -> Option<broadcast::Receiver<Mutation>> {
        None
    }

    async fn bounding_rect(&self, element: &ElementHandle) -> Result<Option<Rect>> {
        let script = format!(
            r#"(() => {{
  const el = document.querySelector({});
  if (!el) return null;
  const r = el.getBoundingClientRect();
  return {{ top: r.top, left: r.left, width: r.width, height: r.height }};
}})()"#,
            js_str(&element.id)
        );
        self.eval(script).await
    }

    async fn viewport(&self) -> Result<Viewport> {
        self.eval(
            "({ width: window.innerWidth, height: window.innerHeight, \
               scroll_x: window.scrollX, scroll_y: window.scrollY })"
                .to_string(),
        )
        .await
    }

    async fn scroll_into_view(&self, element: &ElementHandle) -> Result<()> {
        let found: bool = self
            .eval(format!(
                r#"(() => {{
  const el = document.querySelector({});
  if (!el) return false;
  el.scrollIntoView({{ behavior: 'smooth', block: 'center', inline: 'center' }});
  return true;
}})()"#,
                js_str(&element.id)
            ))
            .await?;
        if !found {
            anyhow::bail!("cannot scroll to missing element '{}'", element.id);
        }
        Ok(())
    }

    async fn click(&self, element: &ElementHandle) -> Result<()> {
        let tab = self.tab.clone();
        let selector = element.id.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            tab.find_element(&selector)?.click()?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow!("click task panicked: {e}"))?
    }

    async fn set_location(&self, change: &LocationChange) -> Result<()> {
        let script = match change {
            LocationChange::Hash(hash) => format!("window.location.hash = {}", js_str(hash)),
            LocationChange::Path(path) => format!("window.location.pathname = {}", js_str(path)),
            LocationChange::Url(url) => format!("window.location.href = {}", js_str(url)),
        };
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            tab.evaluate(&script, false)?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow!("navigation task panicked: {e}"))?
    }
}

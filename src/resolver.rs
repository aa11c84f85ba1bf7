//! Element resolution with optional bounded waiting.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

use crate::dom::{Dom, ElementHandle, Target};
use crate::error::{Result, TourError};

/// Default bound for element waits.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(5000);
/// Poll interval for DOM backends that cannot push mutations.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    pub wait: bool,
    pub timeout: Duration,
}

impl ResolveOptions {
    pub fn immediate() -> Self {
        Self {
            wait: false,
            timeout: Duration::ZERO,
        }
    }

    pub fn wait_up_to(timeout: Duration) -> Self {
        Self {
            wait: true,
            timeout,
        }
    }
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self::wait_up_to(DEFAULT_WAIT_TIMEOUT)
    }
}

/// Finds step targets in the document.
#[derive(Clone)]
pub struct ElementResolver {
    dom: Arc<dyn Dom>,
}

impl ElementResolver {
    pub fn new(dom: Arc<dyn Dom>) -> Self {
        Self { dom }
    }

    /// Resolve `target` to a live element.
    ///
    /// Element handles come back as-is. Selectors are looked up immediately
    /// and, when `opts.wait` is set, re-checked on every DOM mutation until
    /// `opts.timeout` runs out.
    pub async fn resolve(&self, target: &Target, opts: ResolveOptions) -> Result<ElementHandle> {
        let selector = match target {
            Target::Element(handle) => return Ok(handle.clone()),
            Target::Selector(selector) => selector.as_str(),
        };

        if let Some(found) = self.query(selector).await? {
            return Ok(found);
        }

        let not_found = || TourError::ElementNotFound {
            selector: selector.to_string(),
            timeout_ms: opts.timeout.as_millis() as u64,
        };
        if !opts.wait {
            return Err(not_found());
        }

        tracing::debug!(
            %selector,
            timeout_ms = opts.timeout.as_millis() as u64,
            "waiting for element"
        );
        let waited = tokio::time::timeout(opts.timeout, self.wait_for(selector)).await;
        match waited {
            Ok(found) => found,
            Err(_elapsed) => Err(not_found()),
        }
    }

    /// Scroll `element` into view when any part of it is outside the viewport.
    /// Returns whether a scroll was requested.
    pub async fn reveal(&self, element: &ElementHandle) -> Result<bool> {
        let rect = self
            .dom
            .bounding_rect(element)
            .await
            .map_err(|e| TourError::Dom(format!("{e:#}")))?;
        let Some(rect) = rect else {
            return Ok(false);
        };
        let viewport = self
            .dom
            .viewport()
            .await
            .map_err(|e| TourError::Dom(format!("{e:#}")))?;
        if viewport.contains(&rect) {
            return Ok(false);
        }
        self.dom
            .scroll_into_view(element)
            .await
            .map_err(|e| TourError::Dom(format!("{e:#}")))?;
        Ok(true)
    }

    async fn query(&self, selector: &str) -> Result<Option<ElementHandle>> {
        self.dom
            .query(selector)
            .await
            .map_err(|e| TourError::Dom(format!("{e:#}")))
    }

    /// Wait without a bound; the caller wraps this in a timeout. The
    /// mutation receiver lives on this future's stack, so it is dropped
    /// (and the observer detached) on success, error and cancellation alike.
    async fn wait_for(&self, selector: &str) -> Result<ElementHandle> {
        let Some(mut mutations) = self.dom.observe() else {
            return self.poll_for(selector).await;
        };

        // The element may have appeared between the first lookup and
        // subscribing.
        if let Some(found) = self.query(selector).await? {
            return Ok(found);
        }

        loop {
            match mutations.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => {
                    if let Some(found) = self.query(selector).await? {
                        return Ok(found);
                    }
                }
                Err(RecvError::Closed) => return self.poll_for(selector).await,
            }
        }
    }

    async fn poll_for(&self, selector: &str) -> Result<ElementHandle> {
        let mut ticker = tokio::time::interval_at(Instant::now() + POLL_INTERVAL, POLL_INTERVAL);
        loop {
            ticker.tick().await;
            if let Some(found) = self.query(selector).await? {
                return Ok(found);
            }
        }
    }
}

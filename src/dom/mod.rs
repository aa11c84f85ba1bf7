//! The DOM capability the engine runs against.
//!
//! The engine, resolver and dispatcher never touch a browser directly. They go
//! through [`Dom`], which a host implements for its environment. Two
//! implementations ship with the crate: [`MemoryDom`], an in-memory document
//! for tests and headless hosts, and (with the `chrome` feature)
//! [`ChromeDom`](chrome::ChromeDom), which drives a real Chrome tab.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::position::{Rect, Viewport};

#[cfg(feature = "chrome")]
pub mod chrome;
mod memory;

pub use memory::{MemoryDom, MemoryElement};

/// Opaque reference to a live element.
///
/// For [`MemoryDom`] this is the element id; for the Chrome backend it is the
/// selector the element was found with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle {
    pub id: String,
}

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// What a step points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    Selector(String),
    Element(ElementHandle),
}

impl Target {
    /// Human-readable description for logs and errors.
    pub fn describe(&self) -> &str {
        match self {
            Target::Selector(selector) => selector,
            Target::Element(handle) => &handle.id,
        }
    }
}

impl From<&str> for Target {
    fn from(selector: &str) -> Self {
        Target::Selector(selector.to_string())
    }
}

impl From<String> for Target {
    fn from(selector: String) -> Self {
        Target::Selector(selector)
    }
}

impl From<ElementHandle> for Target {
    fn from(handle: ElementHandle) -> Self {
        Target::Element(handle)
    }
}

/// A change notification from the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Nodes were added to or removed from the body subtree.
    ChildList,
    /// An attribute changed on the given element.
    Attributes { element: String },
}

/// How the location should change for a navigate action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum LocationChange {
    /// `#section` style fragment update.
    Hash(String),
    /// Same-origin path update.
    Path(String),
    /// Full URL assignment.
    Url(String),
}

impl LocationChange {
    /// Classify a navigate target the way the default handler does: leading
    /// `#` is a hash, leading `/` a path, anything else a URL.
    pub fn parse(target: &str) -> Self {
        if target.starts_with('#') {
            LocationChange::Hash(target.to_string())
        } else if target.starts_with('/') {
            LocationChange::Path(target.to_string())
        } else {
            LocationChange::Url(target.to_string())
        }
    }
}

/// Access to the document the tour runs on.
#[async_trait]
pub trait Dom: Send + Sync {
    /// First element matching `selector`, if any.
    async fn query(&self, selector: &str) -> anyhow::Result<Option<ElementHandle>>;

    /// Subscribe to body-subtree mutations (child additions and attribute
    /// changes). Dropping the receiver detaches the observer. Backends that
    /// cannot observe return `None` and are polled instead.
    fn observe(&self) -> Option<broadcast::Receiver<Mutation>>;

    /// Viewport-relative bounds of an element, `None` when it is gone.
    async fn bounding_rect(&self, element: &ElementHandle) -> anyhow::Result<Option<Rect>>;

    async fn viewport(&self) -> anyhow::Result<Viewport>;

    /// Smoothly scroll the element to the center of the viewport on both axes.
    async fn scroll_into_view(&self, element: &ElementHandle) -> anyhow::Result<()>;

    /// Dispatch a click on the element.
    async fn click(&self, element: &ElementHandle) -> anyhow::Result<()>;

    async fn set_location(&self, change: &LocationChange) -> anyhow::Result<()>;
}

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{Dom, ElementHandle, LocationChange, Mutation};
use crate::position::{Rect, Viewport};

/// An element living in a [`MemoryDom`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryElement {
    pub id: String,
    /// Selectors, besides `#id`, that this element answers to.
    pub selectors: Vec<String>,
    pub rect: Rect,
}

impl MemoryElement {
    pub fn new(id: impl Into<String>, rect: Rect) -> Self {
        Self {
            id: id.into(),
            selectors: Vec::new(),
            rect,
        }
    }

    #[must_use]
    pub fn matching(mut self, selector: impl Into<String>) -> Self {
        self.selectors.push(selector.into());
        self
    }

    fn matches(&self, selector: &str) -> bool {
        selector.strip_prefix('#') == Some(self.id.as_str())
            || self.selectors.iter().any(|s| s == selector)
    }
}

#[derive(Debug, Default)]
struct Document {
    elements: Vec<MemoryElement>,
    viewport: Viewport,
    clicks: HashMap<String, usize>,
    scrolled: Vec<String>,
    locations: Vec<LocationChange>,
}

/// In-memory document.
///
/// Selector matching is deliberately tiny: `#id`, or any selector string the
/// element was registered with via [`MemoryElement::matching`].
#[derive(Debug)]
pub struct MemoryDom {
    doc: Mutex<Document>,
    mutations: broadcast::Sender<Mutation>,
}

impl Default for MemoryDom {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDom {
    pub fn new() -> Self {
        let (mutations, _) = broadcast::channel(64);
        Self {
            doc: Mutex::new(Document::default()),
            mutations,
        }
    }

    pub fn with_viewport(viewport: Viewport) -> Self {
        let dom = Self::new();
        dom.set_viewport(viewport);
        dom
    }

    fn doc(&self) -> MutexGuard<'_, Document> {
        self.doc.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an element to the body and notify observers.
    pub fn insert(&self, element: MemoryElement) {
        self.doc().elements.push(element);
        let _ = self.mutations.send(Mutation::ChildList);
    }

    pub fn remove(&self, id: &str) {
        self.doc().elements.retain(|el| el.id != id);
        let _ = self.mutations.send(Mutation::ChildList);
    }

    /// Make an existing element answer to another selector, the way a class
    /// or attribute change would.
    pub fn add_selector(&self, id: &str, selector: impl Into<String>) {
        let selector = selector.into();
        let found = {
            let mut doc = self.doc();
            match doc.elements.iter_mut().find(|el| el.id == id) {
                Some(el) => {
                    el.selectors.push(selector);
                    true
                }
                None => false,
            }
        };
        if found {
            let _ = self.mutations.send(Mutation::Attributes {
                element: id.to_string(),
            });
        }
    }

    pub fn set_rect(&self, id: &str, rect: Rect) {
        if let Some(el) = self.doc().elements.iter_mut().find(|el| el.id == id) {
            el.rect = rect;
        }
    }

    pub fn set_viewport(&self, viewport: Viewport) {
        self.doc().viewport = viewport;
    }

    pub fn clicks(&self, id: &str) -> usize {
        self.doc().clicks.get(id).copied().unwrap_or(0)
    }

    /// Ids of elements that were scrolled into view, in order.
    pub fn scrolled(&self) -> Vec<String> {
        self.doc().scrolled.clone()
    }

    pub fn locations(&self) -> Vec<LocationChange> {
        self.doc().locations.clone()
    }

    /// Number of live mutation observers.
    pub fn observer_count(&self) -> usize {
        self.mutations.receiver_count()
    }
}

#[async_trait]
impl Dom for MemoryDom {
    async fn query(&self, selector: &str) -> anyhow::Result<Option<ElementHandle>> {
        Ok(self
            .doc()
            .elements
            .iter()
            .find(|el| el.matches(selector))
            .map(|el| ElementHandle::new(el.id.clone())))
    }

    fn observe(&self) -> Option<broadcast::Receiver<Mutation>> {
        Some(self.mutations.subscribe())
    }

    async fn bounding_rect(&self, element: &ElementHandle) -> anyhow::Result<Option<Rect>> {
        Ok(self
            .doc()
            .elements
            .iter()
            .find(|el| el.id == element.id)
            .map(|el| el.rect))
    }

    async fn viewport(&self) -> anyhow::Result<Viewport> {
        Ok(self.doc().viewport)
    }

    async fn scroll_into_view(&self, element: &ElementHandle) -> anyhow::Result<()> {
        let mut doc = self.doc();
        if !doc.elements.iter().any(|el| el.id == element.id) {
            anyhow::bail!("cannot scroll to detached element '{}'", element.id);
        }
        doc.scrolled.push(element.id.clone());
        Ok(())
    }

    async fn click(&self, element: &ElementHandle) -> anyhow::Result<()> {
        let mut doc = self.doc();
        if !doc.elements.iter().any(|el| el.id == element.id) {
            anyhow::bail!("cannot click detached element '{}'", element.id);
        }
        *doc.clicks.entry(element.id.clone()).or_insert(0) += 1;
        Ok(())
    }

    async fn set_location(&self, change: &LocationChange) -> anyhow::Result<()> {
        self.doc().locations.push(change.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn query_matches_id_and_registered_selectors() {
        let dom = MemoryDom::new();
        dom.insert(MemoryElement::new("save", Rect::default()).matching(".btn-primary"));

        assert_eq!(dom.query("#save").await.unwrap(), Some(ElementHandle::new("save")));
        assert_eq!(
            dom.query(".btn-primary").await.unwrap(),
            Some(ElementHandle::new("save"))
        );
        assert_eq!(dom.query("#missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn attribute_change_notifies_observers() {
        let dom = MemoryDom::new();
        dom.insert(MemoryElement::new("panel", Rect::default()));
        let mut rx = dom.observe().unwrap();

        dom.add_selector("panel", "[data-ready]");
        assert_eq!(
            rx.recv().await.unwrap(),
            Mutation::Attributes {
                element: "panel".into()
            }
        );
        assert!(dom.query("[data-ready]").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dropping_receiver_detaches_observer() {
        let dom = MemoryDom::new();
        let rx = dom.observe().unwrap();
        assert_eq!(dom.observer_count(), 1);
        drop(rx);
        assert_eq!(dom.observer_count(), 0);
    }

    #[tokio::test]
    async fn clicking_a_removed_element_fails() {
        let dom = MemoryDom::new();
        dom.insert(MemoryElement::new("gone", Rect::default()));
        dom.remove("gone");
        assert!(dom.click(&ElementHandle::new("gone")).await.is_err());
    }
}

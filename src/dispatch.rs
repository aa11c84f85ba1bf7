//! Action dispatch.
//!
//! [`ActionDispatcher`] keeps an ordered registry of [`Integration`]s. The
//! first integration that claims an action runs it; if it fails, or nothing
//! claims the action, the built-in handler for the action's kind runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::dom::{Dom, ElementHandle, LocationChange};
use crate::error::{Result, TourError};
use crate::hooks::{HookContext, run_hook};
use crate::resolver::{ElementResolver, ResolveOptions};
use crate::types::{ActionKind, TourAction};

/// Pause between scrolling a click target into view and clicking it.
pub const CLICK_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Upper bound on the clicks one wizard-step action may perform.
pub const MAX_WIZARD_CLICKS: u64 = 20;

/// A pluggable handler for a class of actions (tabs, wizards, routers, ...).
#[async_trait]
pub trait Integration: Send + Sync {
    /// Unique registry key.
    fn name(&self) -> &str;

    fn can_handle(&self, action: &TourAction) -> bool;

    async fn execute(
        &self,
        action: &TourAction,
        element: Option<&ElementHandle>,
        dom: &dyn Dom,
    ) -> anyhow::Result<()>;
}

/// Runs step actions against the DOM.
pub struct ActionDispatcher {
    dom: Arc<dyn Dom>,
    resolver: ElementResolver,
    integrations: Vec<Arc<dyn Integration>>,
}

impl ActionDispatcher {
    pub fn new(dom: Arc<dyn Dom>) -> Self {
        Self {
            resolver: ElementResolver::new(dom.clone()),
            dom,
            integrations: Vec::new(),
        }
    }

    /// A dispatcher with the tab-switch and wizard-step integrations
    /// registered.
    pub fn with_builtin_integrations(dom: Arc<dyn Dom>) -> Self {
        let mut dispatcher = Self::new(dom);
        dispatcher.register_integration(Arc::new(TabSwitchIntegration));
        dispatcher.register_integration(Arc::new(WizardStepIntegration));
        dispatcher
    }

    /// Register an integration. An integration with the same name is
    /// replaced in place, keeping its position in the lookup order.
    pub fn register_integration(&mut self, integration: Arc<dyn Integration>) {
        match self
            .integrations
            .iter_mut()
            .find(|existing| existing.name() == integration.name())
        {
            Some(slot) => *slot = integration,
            None => self.integrations.push(integration),
        }
    }

    /// Returns whether an integration by that name was registered.
    pub fn unregister_integration(&mut self, name: &str) -> bool {
        let before = self.integrations.len();
        self.integrations.retain(|i| i.name() != name);
        self.integrations.len() != before
    }

    pub fn integration_names(&self) -> Vec<&str> {
        self.integrations.iter().map(|i| i.name()).collect()
    }

    /// Run `action`, optionally against an already resolved element.
    pub async fn execute(
        &self,
        action: &TourAction,
        element: Option<&ElementHandle>,
    ) -> Result<()> {
        if action.delay_ms > 0 {
            tokio::time::sleep(action.delay()).await;
        }

        if let Some(integration) = self.integrations.iter().find(|i| i.can_handle(action)) {
            tracing::debug!(
                integration = integration.name(),
                kind = %action.kind,
                "dispatching to integration"
            );
            match integration.execute(action, element, self.dom.as_ref()).await {
                Ok(()) => return Ok(()),
                Err(err) => tracing::warn!(
                    integration = integration.name(),
                    kind = %action.kind,
                    "integration failed, falling back to default handler: {:#}",
                    err
                ),
            }
        }

        self.execute_default(action, element).await
    }

    async fn execute_default(
        &self,
        action: &TourAction,
        element: Option<&ElementHandle>,
    ) -> Result<()> {
        match &action.kind {
            ActionKind::Click => self.click(action, element).await,
            ActionKind::Navigate => {
                let to = action.target.as_deref().ok_or_else(|| TourError::MissingTarget {
                    kind: action.kind.to_string(),
                })?;
                self.dom
                    .set_location(&LocationChange::parse(to))
                    .await
                    .map_err(|e| TourError::Dom(format!("{e:#}")))
            }
            // Painting the highlight belongs to the presentation layer.
            ActionKind::Highlight => Ok(()),
            ActionKind::Custom => {
                let ctx = HookContext {
                    tour_id: String::new(),
                    step: None,
                    step_index: 0,
                    element: element.cloned(),
                };
                let _ = run_hook(action.handler.as_ref(), ctx, "custom action").await;
                Ok(())
            }
            other => {
                tracing::warn!(kind = %other, "no handler for action type, ignoring");
                Ok(())
            }
        }
    }

    async fn click(&self, action: &TourAction, element: Option<&ElementHandle>) -> Result<()> {
        let element = match (element, action.target.as_deref()) {
            (Some(element), _) => element.clone(),
            (None, Some(selector)) => {
                self.resolver
                    .resolve(&selector.into(), ResolveOptions::immediate())
                    .await?
            }
            (None, None) => {
                return Err(TourError::MissingTarget {
                    kind: action.kind.to_string(),
                });
            }
        };
        click_settled(self.dom.as_ref(), &element)
            .await
            .map_err(|e| TourError::Dom(format!("{e:#}")))
    }
}

async fn click_settled(dom: &dyn Dom, element: &ElementHandle) -> anyhow::Result<()> {
    dom.scroll_into_view(element).await?;
    tokio::time::sleep(CLICK_SETTLE_DELAY).await;
    dom.click(element).await
}

/// Switches tabs by clicking the tab trigger.
///
/// The trigger is the action's target selector, or
/// `[role="tab"][data-tab="<value>"]` when only a value is given.
pub struct TabSwitchIntegration;

#[async_trait]
impl Integration for TabSwitchIntegration {
    fn name(&self) -> &str {
        "tab-switch"
    }

    fn can_handle(&self, action: &TourAction) -> bool {
        action.kind == ActionKind::TabSwitch
    }

    async fn execute(
        &self,
        action: &TourAction,
        _element: Option<&ElementHandle>,
        dom: &dyn Dom,
    ) -> anyhow::Result<()> {
        let selector = match (&action.target, action.value.as_ref().and_then(|v| v.as_str())) {
            (Some(target), _) => target.clone(),
            (None, Some(tab)) => format!(r#"[role="tab"][data-tab="{tab}"]"#),
            (None, None) => anyhow::bail!("tab-switch needs a target or a tab value"),
        };
        let tab = dom
            .query(&selector)
            .await?
            .ok_or_else(|| anyhow::anyhow!("tab trigger '{selector}' not found"))?;
        click_settled(dom, &tab).await
    }
}

/// Advances a multi-step wizard by clicking its "next" control `value` times.
pub struct WizardStepIntegration;

#[async_trait]
impl Integration for WizardStepIntegration {
    fn name(&self) -> &str {
        "wizard-step"
    }

    fn can_handle(&self, action: &TourAction) -> bool {
        action.kind == ActionKind::WizardStep
    }

    async fn execute(
        &self,
        action: &TourAction,
        element: Option<&ElementHandle>,
        dom: &dyn Dom,
    ) -> anyhow::Result<()> {
        let times = action.value.as_ref().and_then(|v| v.as_u64()).unwrap_or(1);
        if times > MAX_WIZARD_CLICKS {
            anyhow::bail!(
                "wizard-step asked for {times} clicks, at most {MAX_WIZARD_CLICKS} allowed"
            );
        }
        let control = match (&action.target, element) {
            (Some(selector), _) => dom
                .query(selector)
                .await?
                .ok_or_else(|| anyhow::anyhow!("wizard control '{selector}' not found"))?,
            (None, Some(element)) => element.clone(),
            (None, None) => anyhow::bail!("wizard-step needs a target"),
        };
        for _ in 0..times {
            click_settled(dom, &control).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{MemoryDom, MemoryElement};
    use crate::hooks::Hook;
    use crate::position::Rect;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dom_with(ids: &[&str]) -> Arc<MemoryDom> {
        let dom = Arc::new(MemoryDom::new());
        for id in ids {
            dom.insert(MemoryElement::new(*id, Rect::new(10.0, 10.0, 40.0, 20.0)));
        }
        dom
    }

    struct Counting {
        name: &'static str,
        kind: ActionKind,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Integration for Counting {
        fn name(&self) -> &str {
            self.name
        }

        fn can_handle(&self, action: &TourAction) -> bool {
            action.kind == self.kind
        }

        async fn execute(
            &self,
            _action: &TourAction,
            _element: Option<&ElementHandle>,
            _dom: &dyn Dom,
        ) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("integration broke");
            }
            Ok(())
        }
    }

    fn counting(name: &'static str, kind: &str, fail: bool) -> (Arc<Counting>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let integration = Arc::new(Counting {
            name,
            kind: kind.into(),
            calls: calls.clone(),
            fail,
        });
        (integration, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn click_resolves_scrolls_and_clicks() {
        let dom = dom_with(&["save"]);
        let dispatcher = ActionDispatcher::new(dom.clone());
        dispatcher.execute(&TourAction::click("#save"), None).await.unwrap();
        assert_eq!(dom.clicks("save"), 1);
        assert_eq!(dom.scrolled(), vec!["save".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn click_on_missing_target_fails() {
        let dispatcher = ActionDispatcher::new(dom_with(&[]));
        let err = dispatcher.execute(&TourAction::click("#missing"), None).await.unwrap_err();
        assert!(matches!(err, TourError::ElementNotFound { .. }));

        let err = dispatcher
            .execute(&TourAction::new(ActionKind::Click), None)
            .await
            .unwrap_err();
        assert_eq!(err, TourError::MissingTarget { kind: "click".into() });
    }

    #[tokio::test(start_paused = true)]
    async fn supplied_element_wins_over_selector() {
        let dom = dom_with(&["a", "b"]);
        let dispatcher = ActionDispatcher::new(dom.clone());
        dispatcher
            .execute(&TourAction::click("#a"), Some(&ElementHandle::new("b")))
            .await
            .unwrap();
        assert_eq!(dom.clicks("a"), 0);
        assert_eq!(dom.clicks("b"), 1);
    }

    #[tokio::test]
    async fn navigate_dispatches_on_target_prefix() {
        let dom = dom_with(&[]);
        let dispatcher = ActionDispatcher::new(dom.clone());
        for to in ["#faq", "/settings", "https://example.com"] {
            dispatcher.execute(&TourAction::navigate(to), None).await.unwrap();
        }
        assert_eq!(
            dom.locations(),
            vec![
                LocationChange::Hash("#faq".into()),
                LocationChange::Path("/settings".into()),
                LocationChange::Url("https://example.com".into()),
            ]
        );
    }

    #[tokio::test]
    async fn custom_action_runs_handler_and_tolerates_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let action = TourAction::custom(Hook::from_fn(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("handler failed"))
        }));
        let dispatcher = ActionDispatcher::new(dom_with(&[]));
        dispatcher.execute(&action, None).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // No handler is a no-op.
        dispatcher.execute(&TourAction::new(ActionKind::Custom), None).await.unwrap();
    }

    #[tokio::test]
    async fn integration_claims_its_action_instead_of_default() {
        let (integration, calls) = counting("foo", "custom-foo", false);
        let mut dispatcher = ActionDispatcher::new(dom_with(&[]));
        dispatcher.register_integration(integration);

        dispatcher.execute(&TourAction::new("custom-foo"), None).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_integration_falls_back_to_default() {
        let (integration, calls) = counting("nav", "navigate", true);
        let dom = dom_with(&[]);
        let mut dispatcher = ActionDispatcher::new(dom.clone());
        dispatcher.register_integration(integration);

        dispatcher.execute(&TourAction::navigate("#top"), None).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dom.locations(), vec![LocationChange::Hash("#top".into())]);
    }

    #[tokio::test]
    async fn first_registered_match_wins_and_names_are_unique() {
        let (first, first_calls) = counting("first", "custom-foo", false);
        let (second, second_calls) = counting("second", "custom-foo", false);
        let mut dispatcher = ActionDispatcher::new(dom_with(&[]));
        dispatcher.register_integration(first);
        dispatcher.register_integration(second);

        dispatcher.execute(&TourAction::new("custom-foo"), None).await.unwrap();
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);

        let (replacement, replacement_calls) = counting("first", "custom-foo", false);
        dispatcher.register_integration(replacement);
        assert_eq!(dispatcher.integration_names(), vec!["first", "second"]);
        dispatcher.execute(&TourAction::new("custom-foo"), None).await.unwrap();
        assert_eq!(replacement_calls.load(Ordering::SeqCst), 1);

        assert!(dispatcher.unregister_integration("first"));
        assert!(!dispatcher.unregister_integration("first"));
        dispatcher.execute(&TourAction::new("custom-foo"), None).await.unwrap();
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_awaited_before_dispatch() {
        let dom = dom_with(&["save"]);
        let dispatcher = ActionDispatcher::new(dom.clone());
        let started = tokio::time::Instant::now();
        dispatcher
            .execute(&TourAction::click("#save").with_delay(500), None)
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(500) + CLICK_SETTLE_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn tab_switch_clicks_trigger_by_value() {
        let dom = dom_with(&[]);
        dom.insert(
            MemoryElement::new("billing-tab", Rect::default())
                .matching(r#"[role="tab"][data-tab="billing"]"#),
        );
        let dispatcher = ActionDispatcher::with_builtin_integrations(dom.clone());
        let action =
            TourAction::new(ActionKind::TabSwitch).with_value(serde_json::json!("billing"));
        dispatcher.execute(&action, None).await.unwrap();
        assert_eq!(dom.clicks("billing-tab"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wizard_step_clicks_next_control_value_times() {
        let dom = dom_with(&["wizard-next"]);
        let dispatcher = ActionDispatcher::with_builtin_integrations(dom.clone());
        let action = TourAction::new(ActionKind::WizardStep)
            .with_target("#wizard-next")
            .with_value(serde_json::json!(3));
        dispatcher.execute(&action, None).await.unwrap();
        assert_eq!(dom.clicks("wizard-next"), 3);
    }

    #[tokio::test]
    async fn wizard_step_rejects_runaway_click_counts() {
        let dom = dom_with(&["wizard-next"]);
        let action = TourAction::new(ActionKind::WizardStep)
            .with_target("#wizard-next")
            .with_value(serde_json::json!(1_000_000));

        let direct = WizardStepIntegration.execute(&action, None, dom.as_ref()).await;
        assert!(direct.is_err());

        let dispatcher = ActionDispatcher::with_builtin_integrations(dom.clone());
        dispatcher.execute(&action, None).await.unwrap();
        assert_eq!(dom.clicks("wizard-next"), 0);
    }

    #[tokio::test]
    async fn unclaimed_tab_switch_is_a_warning_no_op() {
        let dispatcher = ActionDispatcher::new(dom_with(&[]));
        dispatcher
            .execute(&TourAction::new(ActionKind::TabSwitch).with_target("#tab"), None)
            .await
            .unwrap();
    }
}

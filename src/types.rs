use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dom::Target;
use crate::error::{Result, TourError};
use crate::hooks::Hook;
use crate::position::Placement;
use crate::resolver::DEFAULT_WAIT_TIMEOUT;
use crate::storage::default_storage_key;

/// Kind of automated action a step performs when the user advances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionKind {
    Click,
    Navigate,
    Highlight,
    TabSwitch,
    WizardStep,
    Custom,
    /// A kind only a registered integration knows how to run.
    Other(String),
}

impl ActionKind {
    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Navigate => "navigate",
            ActionKind::Highlight => "highlight",
            ActionKind::TabSwitch => "tab-switch",
            ActionKind::WizardStep => "wizard-step",
            ActionKind::Custom => "custom",
            ActionKind::Other(name) => name,
        }
    }
}

impl From<String> for ActionKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "click" => ActionKind::Click,
            "navigate" => ActionKind::Navigate,
            "highlight" => ActionKind::Highlight,
            "tab-switch" => ActionKind::TabSwitch,
            "wizard-step" => ActionKind::WizardStep,
            "custom" => ActionKind::Custom,
            _ => ActionKind::Other(name),
        }
    }
}

impl From<&str> for ActionKind {
    fn from(name: &str) -> Self {
        ActionKind::from(name.to_string())
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Automated action attached to a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TourAction {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    /// Selector for click-like actions, URL/hash/path for navigate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// Callback for `custom` actions.
    #[serde(skip)]
    pub handler: Option<Hook>,
    /// Milliseconds to wait before dispatching.
    #[serde(default)]
    pub delay_ms: u64,
}

impl TourAction {
    pub fn new(kind: impl Into<ActionKind>) -> Self {
        Self {
            kind: kind.into(),
            target: None,
            value: None,
            handler: None,
            delay_ms: 0,
        }
    }

    pub fn click(selector: impl Into<String>) -> Self {
        Self::new(ActionKind::Click).with_target(selector)
    }

    pub fn navigate(to: impl Into<String>) -> Self {
        Self::new(ActionKind::Navigate).with_target(to)
    }

    pub fn custom(handler: Hook) -> Self {
        Self {
            handler: Some(handler),
            ..Self::new(ActionKind::Custom)
        }
    }

    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    #[must_use]
    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = Some(value);
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Override for the popover's "previous" control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviousButton {
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip)]
    pub on_click: Option<Hook>,
}

impl Default for PreviousButton {
    fn default() -> Self {
        Self {
            visible: true,
            label: None,
            on_click: None,
        }
    }
}

/// One stop on the tour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TourStep {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    /// Rich-text (HTML) body; shown instead of `content` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rich_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<TourAction>,
    /// Presentation overrides, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popover: Option<serde_json::Value>,
    #[serde(skip)]
    pub before_step: Option<Hook>,
    #[serde(skip)]
    pub after_step: Option<Hook>,
    #[serde(default = "default_true")]
    pub can_skip: bool,
    #[serde(default)]
    pub wait_for_element: bool,
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_interactions: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click_to_advance: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_button: Option<PreviousButton>,
}

impl TourStep {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: String::new(),
            rich_content: None,
            target: None,
            placement: Placement::default(),
            action: None,
            highlight: None,
            popover: None,
            before_step: None,
            after_step: None,
            can_skip: true,
            wait_for_element: false,
            wait_timeout_ms: default_wait_timeout_ms(),
            block_interactions: None,
            click_to_advance: None,
            previous_button: None,
        }
    }

    #[must_use]
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    #[must_use]
    pub fn rich_content(mut self, html: impl Into<String>) -> Self {
        self.rich_content = Some(html.into());
        self
    }

    #[must_use]
    pub fn target(mut self, target: impl Into<Target>) -> Self {
        self.target = Some(target.into());
        self
    }

    #[must_use]
    pub fn placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    #[must_use]
    pub fn action(mut self, action: TourAction) -> Self {
        self.action = Some(action);
        self
    }

    #[must_use]
    pub fn before_step(mut self, hook: Hook) -> Self {
        self.before_step = Some(hook);
        self
    }

    #[must_use]
    pub fn after_step(mut self, hook: Hook) -> Self {
        self.after_step = Some(hook);
        self
    }

    #[must_use]
    pub fn can_skip(mut self, can_skip: bool) -> Self {
        self.can_skip = can_skip;
        self
    }

    /// Wait up to `timeout_ms` for the target before showing the step.
    #[must_use]
    pub fn wait_for_element(mut self, timeout_ms: u64) -> Self {
        self.wait_for_element = true;
        self.wait_timeout_ms = timeout_ms;
        self
    }

    #[must_use]
    pub fn block_interactions(mut self, block: bool) -> Self {
        self.block_interactions = Some(block);
        self
    }

    #[must_use]
    pub fn click_to_advance(mut self, enabled: bool) -> Self {
        self.click_to_advance = Some(enabled);
        self
    }

    #[must_use]
    pub fn previous_button(mut self, button: PreviousButton) -> Self {
        self.previous_button = Some(button);
        self
    }

    /// The body to render: rich content wins over plain content.
    pub fn body(&self) -> &str {
        self.rich_content.as_deref().unwrap_or(&self.content)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

/// Tour-wide behavior switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TourOptions {
    pub allow_keyboard_navigation: bool,
    pub allow_click_outside: bool,
    pub block_interactions: bool,
    pub click_to_advance: bool,
    pub show_progress: bool,
}

impl Default for TourOptions {
    fn default() -> Self {
        Self {
            allow_keyboard_navigation: true,
            allow_click_outside: false,
            block_interactions: false,
            click_to_advance: false,
            show_progress: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistenceOptions {
    /// Remember progress across engine instances.
    pub remember: bool,
    /// Storage key; derived from the tour id when unset.
    pub storage_key: Option<String>,
}

/// Tour-level lifecycle callbacks.
#[derive(Debug, Clone, Default)]
pub struct TourHooks {
    pub on_start: Option<Hook>,
    pub on_complete: Option<Hook>,
    pub on_skip: Option<Hook>,
    pub on_step_change: Option<Hook>,
}

/// The full, immutable description of a tour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TourDefinition {
    pub id: String,
    pub steps: Vec<TourStep>,
    /// Opaque presentation theme.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<serde_json::Value>,
    #[serde(default)]
    pub options: TourOptions,
    #[serde(default)]
    pub persistence: PersistenceOptions,
    #[serde(skip)]
    pub hooks: TourHooks,
}

impl TourDefinition {
    pub fn new(id: impl Into<String>, steps: Vec<TourStep>) -> Self {
        Self {
            id: id.into(),
            steps,
            theme: None,
            options: TourOptions::default(),
            persistence: PersistenceOptions::default(),
            hooks: TourHooks::default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let definition: Self = serde_json::from_str(json)?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| TourError::Definition(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    #[must_use]
    pub fn options(mut self, options: TourOptions) -> Self {
        self.options = options;
        self
    }

    /// Persist progress under the default key for this tour.
    #[must_use]
    pub fn remember(mut self) -> Self {
        self.persistence.remember = true;
        self
    }

    #[must_use]
    pub fn storage_key(mut self, key: impl Into<String>) -> Self {
        self.persistence.storage_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn on_start(mut self, hook: Hook) -> Self {
        self.hooks.on_start = Some(hook);
        self
    }

    #[must_use]
    pub fn on_complete(mut self, hook: Hook) -> Self {
        self.hooks.on_complete = Some(hook);
        self
    }

    #[must_use]
    pub fn on_skip(mut self, hook: Hook) -> Self {
        self.hooks.on_skip = Some(hook);
        self
    }

    #[must_use]
    pub fn on_step_change(mut self, hook: Hook) -> Self {
        self.hooks.on_step_change = Some(hook);
        self
    }

    pub fn key(&self) -> String {
        self.persistence
            .storage_key
            .clone()
            .unwrap_or_else(|| default_storage_key(&self.id))
    }

    /// Reject empty tours and duplicate step ids.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(TourError::InvalidDefinition(format!(
                "tour '{}' has no steps",
                self.id
            )));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(TourError::InvalidDefinition(format!(
                    "duplicate step id '{}' in tour '{}'",
                    step.id, self.id
                )));
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_wait_timeout_ms() -> u64 {
    DEFAULT_WAIT_TIMEOUT.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    const WELCOME: &str = r##"{
        "id": "welcome",
        "steps": [
            { "id": "intro", "title": "Welcome", "content": "Hi", "placement": "center" },
            {
                "id": "save",
                "title": "Save",
                "target": "#save",
                "waitForElement": true,
                "waitTimeoutMs": 250,
                "action": { "type": "click", "target": "#save", "delayMs": 10 }
            },
            { "id": "tabs", "title": "Tabs", "action": { "type": "custom-foo" } }
        ],
        "options": { "showProgress": false },
        "persistence": { "remember": true }
    }"##;

    #[test]
    fn loads_definition_from_json_with_defaults() {
        let tour = TourDefinition::from_json(WELCOME).unwrap();
        assert_eq!(tour.steps.len(), 3);
        assert_eq!(tour.steps[0].placement, Placement::Center);
        assert_eq!(tour.steps[0].wait_timeout_ms, 5000);
        assert!(tour.steps[0].can_skip);

        let save = &tour.steps[1];
        assert_eq!(save.target, Some(Target::Selector("#save".into())));
        assert!(save.wait_for_element);
        let action = save.action.as_ref().unwrap();
        assert_eq!(action.kind, ActionKind::Click);
        assert_eq!(action.delay_ms, 10);

        let custom = tour.steps[2].action.as_ref().unwrap();
        assert_eq!(custom.kind, ActionKind::Other("custom-foo".into()));

        assert!(!tour.options.show_progress);
        assert!(tour.options.allow_keyboard_navigation);
        assert!(tour.persistence.remember);
        assert_eq!(tour.key(), "tourguide:welcome");
    }

    #[test]
    fn duplicate_step_ids_are_rejected() {
        let tour = TourDefinition::new(
            "dup",
            vec![TourStep::new("a", "A"), TourStep::new("a", "Again")],
        );
        assert!(matches!(
            tour.validate(),
            Err(TourError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn empty_tour_is_rejected() {
        assert!(TourDefinition::new("empty", vec![]).validate().is_err());
    }

    #[test]
    fn rich_content_takes_precedence() {
        let step = TourStep::new("s", "S").content("plain");
        assert_eq!(step.body(), "plain");
        assert_eq!(step.rich_content("<b>rich</b>").body(), "<b>rich</b>");
    }

    #[test]
    fn action_kind_round_trips_through_its_name() {
        for name in ["click", "navigate", "tab-switch", "wizard-step", "custom", "router"] {
            assert_eq!(ActionKind::from(name).as_str(), name);
        }
    }
}

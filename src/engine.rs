//! The tour state machine.
//!
//! A [`TourEngine`] owns one [`TourDefinition`] and walks it:
//!
//! ```text
//!   idle ──start──▶ running ──next on last step──▶ completed
//!                    │  ▲ next / previous / go_to_step
//!                    │  └────────┘
//!                    ├──skip──▶ skipped
//!                    └──stop──▶ idle
//!   any ──reset_tour_state──▶ idle
//! ```
//!
//! Navigation takes `&mut self`, so one engine runs one operation at a time.
//! Hosts that feed intents from several tasks share the engine behind an
//! `Arc<tokio::sync::Mutex<TourEngine>>`, whose FIFO lock queues them.
//!
//! Consumer callbacks are advisory: hook failures are logged and the tour
//! keeps going. Only structural errors (bad index, no current step) and
//! failed step actions abort an operation; they are returned and emitted as
//! [`TourEvent::Error`], and leave the visible step untouched.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_stream::wrappers::BroadcastStream;

use crate::dispatch::ActionDispatcher;
use crate::dom::{Dom, ElementHandle, MemoryDom};
use crate::error::{Result, TourError};
use crate::events::{EventBus, EventKind, ListenerId, Subscription, TourEvent};
use crate::hooks::{Hook, HookContext, run_hook};
use crate::position::{Position, Size, compute_centered, compute_position};
use crate::resolver::{ElementResolver, ResolveOptions};
use crate::storage::{PersistedTourState, PersistenceStore};
use crate::types::{TourDefinition, TourStep};

/// Live progress of a tour.
#[derive(Debug, Clone, Serialize)]
pub struct TourState {
    pub is_running: bool,
    pub current_step_index: usize,
    pub current_step: Option<TourStep>,
    pub total_steps: usize,
    pub is_loading: bool,
    pub error: Option<String>,
    pub completed_steps: BTreeSet<String>,
    pub skipped_steps: BTreeSet<String>,
    pub is_completed: bool,
    pub is_skipped: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub skipped_at: Option<DateTime<Utc>>,
}

impl TourState {
    fn fresh(total_steps: usize) -> Self {
        Self {
            is_running: false,
            current_step_index: 0,
            current_step: None,
            total_steps,
            is_loading: false,
            error: None,
            completed_steps: BTreeSet::new(),
            skipped_steps: BTreeSet::new(),
            is_completed: false,
            is_skipped: false,
            completed_at: None,
            skipped_at: None,
        }
    }

    fn seeded(total_steps: usize, snapshot: PersistedTourState) -> Self {
        Self {
            current_step_index: snapshot.current_step_index.min(total_steps.saturating_sub(1)),
            completed_steps: snapshot.completed_steps,
            skipped_steps: snapshot.skipped_steps,
            // Never both: a corrupt snapshot with both flags counts as completed.
            is_completed: snapshot.is_completed,
            is_skipped: snapshot.is_skipped && !snapshot.is_completed,
            completed_at: snapshot.completed_at,
            skipped_at: snapshot.skipped_at,
            ..Self::fresh(total_steps)
        }
    }

    fn snapshot(&self) -> PersistedTourState {
        PersistedTourState {
            current_step_index: self.current_step_index,
            completed_steps: self.completed_steps.clone(),
            skipped_steps: self.skipped_steps.clone(),
            is_completed: self.is_completed,
            is_skipped: self.is_skipped,
            completed_at: self.completed_at,
            skipped_at: self.skipped_at,
        }
    }
}

/// 1-based progress for "step 2 of 5" displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
}

/// Resolved previous-control appearance for the current step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviousButtonState {
    pub visible: bool,
    pub label: String,
}

/// Keys the engine reacts to when keyboard navigation is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TourKey {
    Left,
    Right,
    Enter,
    Escape,
}

/// Builder for [`TourEngine`].
pub struct TourEngineBuilder {
    definition: TourDefinition,
    dom: Option<Arc<dyn Dom>>,
    store: Option<PersistenceStore>,
    dispatcher: Option<ActionDispatcher>,
}

impl TourEngineBuilder {
    #[must_use]
    pub fn dom(mut self, dom: Arc<dyn Dom>) -> Self {
        self.dom = Some(dom);
        self
    }

    #[must_use]
    pub fn store(mut self, store: PersistenceStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a pre-configured dispatcher. It should share the engine's DOM.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: ActionDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Validate the definition and build the engine, seeding state from the
    /// persisted snapshot when the tour remembers progress.
    pub fn build(self) -> Result<TourEngine> {
        self.definition.validate()?;

        let dom = self
            .dom
            .unwrap_or_else(|| Arc::new(MemoryDom::new()) as Arc<dyn Dom>);
        let store = self.store.unwrap_or_default();
        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| ActionDispatcher::with_builtin_integrations(dom.clone()));
        let key = self.definition.key();
        let total = self.definition.steps.len();

        let restored = if self.definition.persistence.remember {
            store.load(&key)
        } else {
            None
        };
        let state = match restored {
            Some(snapshot) => {
                tracing::debug!(
                    tour = %self.definition.id,
                    index = snapshot.current_step_index,
                    "restored tour progress"
                );
                TourState::seeded(total, snapshot)
            }
            None => TourState::fresh(total),
        };

        Ok(TourEngine {
            resolver: ElementResolver::new(dom.clone()),
            definition: self.definition,
            dom,
            store,
            dispatcher,
            events: EventBus::new(),
            state,
            target: None,
            key,
        })
    }
}

/// Drives one tour.
pub struct TourEngine {
    definition: TourDefinition,
    dom: Arc<dyn Dom>,
    resolver: ElementResolver,
    store: PersistenceStore,
    dispatcher: ActionDispatcher,
    events: EventBus,
    state: TourState,
    target: Option<ElementHandle>,
    key: String,
}

impl TourEngine {
    pub fn builder(definition: TourDefinition) -> TourEngineBuilder {
        TourEngineBuilder {
            definition,
            dom: None,
            store: None,
            dispatcher: None,
        }
    }

    /// Engine over `dom` with in-memory persistence.
    pub fn new(definition: TourDefinition, dom: Arc<dyn Dom>) -> Result<Self> {
        Self::builder(definition).dom(dom).build()
    }

    // ── Navigation ──

    pub async fn start(&mut self) -> Result<()> {
        if self.state.is_running {
            return Ok(());
        }
        if self.state.is_completed || self.state.is_skipped {
            tracing::debug!(tour = %self.definition.id, "restarting finished tour");
            self.state.is_completed = false;
            self.state.is_skipped = false;
            self.state.completed_at = None;
            self.state.skipped_at = None;
            self.state.current_step_index = 0;
        }

        tracing::info!(
            tour = %self.definition.id,
            index = self.state.current_step_index,
            "starting tour"
        );
        self.state.is_running = true;
        self.state.is_loading = true;
        self.state.error = None;
        self.events.emit(TourEvent::TourStart {
            tour_id: self.definition.id.clone(),
        });
        let on_start = self.definition.hooks.on_start.clone();
        self.run_tour_hook(on_start.as_ref(), "on_start").await;

        if let Err(err) = self.enter_step(self.state.current_step_index).await {
            self.stop();
            return Err(err);
        }
        Ok(())
    }

    /// Run the step's action, then advance (or complete on the last step).
    pub async fn next(&mut self) -> Result<()> {
        if !self.state.is_running {
            return Ok(());
        }
        let Some(step) = self.state.current_step.clone() else {
            let err = TourError::InvalidState("next() called with no current step".into());
            return Err(self.fail(err));
        };
        let index = self.state.current_step_index;

        if let Some(action) = &step.action {
            self.state.is_loading = true;
            let result = self.dispatcher.execute(action, self.target.as_ref()).await;
            if let Err(err) = result {
                return Err(self.fail(err));
            }
        }

        let ctx = self.hook_context(Some(step.clone()), index);
        let _ = run_hook(step.after_step.as_ref(), ctx, "after_step").await;

        self.state.completed_steps.insert(step.id.clone());

        if index + 1 >= self.state.total_steps {
            self.complete().await;
            Ok(())
        } else {
            self.enter_step(index + 1).await
        }
    }

    pub async fn previous(&mut self) -> Result<()> {
        if !self.state.is_running || self.state.current_step_index == 0 {
            return Ok(());
        }
        self.enter_step(self.state.current_step_index - 1).await
    }

    pub async fn go_to_step(&mut self, index: usize) -> Result<()> {
        self.enter_step(index).await
    }

    /// Abandon the tour, remembering that the user skipped it.
    pub async fn skip(&mut self) {
        if !self.state.is_running {
            return;
        }
        let index = self.state.current_step_index;
        if let Some(step) = &self.state.current_step {
            self.state.skipped_steps.insert(step.id.clone());
        }
        self.state.is_skipped = true;
        self.state.skipped_at = Some(Utc::now());
        tracing::info!(tour = %self.definition.id, step_index = index, "tour skipped");

        self.events.emit(TourEvent::TourSkip {
            tour_id: self.definition.id.clone(),
            step_index: index,
        });
        let on_skip = self.definition.hooks.on_skip.clone();
        self.run_tour_hook(on_skip.as_ref(), "on_skip").await;
        self.persist();
        self.stop();
    }

    /// Finish the tour successfully. Does nothing once the tour was skipped.
    pub async fn complete(&mut self) {
        if self.state.is_skipped {
            return;
        }
        self.state.is_running = false;
        self.state.is_loading = false;
        self.state.is_completed = true;
        self.state.completed_at = Some(Utc::now());
        tracing::info!(tour = %self.definition.id, "tour completed");

        self.events.emit(TourEvent::TourComplete {
            tour_id: self.definition.id.clone(),
        });
        let on_complete = self.definition.hooks.on_complete.clone();
        self.run_tour_hook(on_complete.as_ref(), "on_complete").await;
        self.persist();
        self.emit_state();
    }

    /// Dismiss without marking the tour completed or skipped.
    pub fn stop(&mut self) {
        self.state.is_running = false;
        self.state.is_loading = false;
        self.state.current_step = None;
        self.target = None;
        self.emit_state();
    }

    // ── Persistence ──

    pub fn should_show_tour(&self) -> bool {
        if !self.definition.persistence.remember {
            return true;
        }
        match self.store.load(&self.key) {
            Some(snapshot) => !snapshot.is_completed && !snapshot.is_skipped,
            None => true,
        }
    }

    pub fn reset_tour_state(&mut self) {
        if self.definition.persistence.remember {
            self.store.clear(&self.key);
        }
        self.state = TourState::fresh(self.definition.steps.len());
        self.target = None;
        tracing::debug!(tour = %self.definition.id, "tour state reset");
        self.emit_state();
    }

    // ── Queries ──

    pub fn definition(&self) -> &TourDefinition {
        &self.definition
    }

    pub fn state(&self) -> TourState {
        self.state.clone()
    }

    pub fn current_step(&self) -> Option<&TourStep> {
        self.state.current_step.as_ref()
    }

    /// Element resolved for the current step, if it was found.
    pub fn current_target(&self) -> Option<&ElementHandle> {
        self.target.as_ref()
    }

    pub fn is_first_step(&self) -> bool {
        self.state.current_step_index == 0
    }

    pub fn is_last_step(&self) -> bool {
        self.state.current_step_index + 1 == self.state.total_steps
    }

    pub fn can_go_next(&self) -> bool {
        self.state.is_running && !self.is_last_step() && !self.state.is_loading
    }

    pub fn can_go_previous(&self) -> bool {
        self.state.is_running && !self.is_first_step() && !self.state.is_loading
    }

    pub fn progress(&self) -> Option<Progress> {
        self.definition.options.show_progress.then(|| Progress {
            current: self.state.current_step_index + 1,
            total: self.state.total_steps,
        })
    }

    pub fn blocks_interactions(&self) -> bool {
        self.current_step()
            .and_then(|s| s.block_interactions)
            .unwrap_or(self.definition.options.block_interactions)
    }

    pub fn click_to_advance(&self) -> bool {
        self.current_step()
            .and_then(|s| s.click_to_advance)
            .unwrap_or(self.definition.options.click_to_advance)
    }

    pub fn previous_button(&self) -> PreviousButtonState {
        let button = self.current_step().and_then(|s| s.previous_button.as_ref());
        PreviousButtonState {
            visible: !self.is_first_step() && button.is_none_or(|b| b.visible),
            label: button
                .and_then(|b| b.label.clone())
                .unwrap_or_else(|| "Previous".to_string()),
        }
    }

    /// Where the popover for the current step should go.
    ///
    /// Steps without a resolved target (or whose target has left the
    /// document) are centered.
    pub async fn popover_position(&self, popover: Size) -> Result<Option<Position>> {
        let Some(step) = self.current_step() else {
            return Ok(None);
        };
        let viewport = self
            .dom
            .viewport()
            .await
            .map_err(|e| TourError::Dom(format!("{e:#}")))?;
        let rect = match &self.target {
            Some(target) => self
                .dom
                .bounding_rect(target)
                .await
                .map_err(|e| TourError::Dom(format!("{e:#}")))?,
            None => None,
        };
        Ok(Some(match rect {
            Some(rect) => compute_position(&rect, popover, step.placement, &viewport),
            None => compute_centered(popover, &viewport),
        }))
    }

    // ── User intents ──

    /// Previous control pressed: the step's custom handler when it has one,
    /// otherwise [`previous`](Self::previous). Ignored while idle and on the
    /// first step, where the control is hidden.
    pub async fn press_previous(&mut self) -> Result<()> {
        if !self.state.is_running || self.is_first_step() {
            return Ok(());
        }
        let handler: Option<Hook> = self
            .current_step()
            .and_then(|s| s.previous_button.as_ref())
            .and_then(|b| b.on_click.clone());
        match handler {
            Some(handler) => {
                let ctx = self.hook_context(
                    self.state.current_step.clone(),
                    self.state.current_step_index,
                );
                let _ = run_hook(Some(&handler), ctx, "previous_button").await;
                Ok(())
            }
            None => self.previous().await,
        }
    }

    pub async fn handle_key(&mut self, key: TourKey) -> Result<()> {
        if !self.state.is_running || !self.definition.options.allow_keyboard_navigation {
            return Ok(());
        }
        match key {
            TourKey::Right | TourKey::Enter => self.next().await,
            TourKey::Left => self.previous().await,
            TourKey::Escape => {
                if self.current_step().is_some_and(|s| s.can_skip) {
                    self.skip().await;
                } else {
                    self.stop();
                }
                Ok(())
            }
        }
    }

    /// The highlighted target was clicked.
    pub async fn handle_target_click(&mut self) -> Result<()> {
        if self.state.is_running && self.click_to_advance() {
            self.next().await
        } else {
            Ok(())
        }
    }

    /// The backdrop outside the target was clicked.
    pub fn handle_click_outside(&mut self) {
        if self.state.is_running && self.definition.options.allow_click_outside {
            self.stop();
        }
    }

    // ── Integrations and events ──

    pub fn dispatcher_mut(&mut self) -> &mut ActionDispatcher {
        &mut self.dispatcher
    }

    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&TourEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, callback)
    }

    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.events.off(kind, id)
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&TourEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    pub fn events(&self) -> tokio::sync::broadcast::Receiver<TourEvent> {
        self.events.receiver()
    }

    pub fn event_stream(&self) -> BroadcastStream<TourEvent> {
        self.events.stream()
    }

    // ── Internals ──

    /// The step-entry sequence shared by start, next, previous and go_to_step.
    async fn enter_step(&mut self, index: usize) -> Result<()> {
        let total = self.state.total_steps;
        if index >= total {
            // Rejected before anything changed, so the state stays as it was.
            let err = TourError::StepOutOfRange { index, total };
            self.report(&err);
            return Err(err);
        }
        let step = self.definition.steps[index].clone();
        tracing::debug!(tour = %self.definition.id, index, step = %step.id, "entering step");

        self.state.is_loading = true;
        self.emit_state();

        // The target is not resolved yet when before_step runs.
        let ctx = HookContext {
            element: None,
            ..self.hook_context(Some(step.clone()), index)
        };
        let _ = run_hook(step.before_step.as_ref(), ctx, "before_step").await;

        let target = match &step.target {
            Some(target) => {
                let opts = if step.wait_for_element {
                    ResolveOptions::wait_up_to(step.wait_timeout())
                } else {
                    ResolveOptions::immediate()
                };
                match self.resolver.resolve(target, opts).await {
                    Ok(element) => Some(element),
                    Err(err) if step.wait_for_element => {
                        tracing::warn!(
                            step = %step.id,
                            target = target.describe(),
                            "target never appeared, showing step anyway: {}",
                            err
                        );
                        None
                    }
                    Err(err) => {
                        tracing::debug!(
                            step = %step.id,
                            target = target.describe(),
                            "target not present: {}",
                            err
                        );
                        None
                    }
                }
            }
            None => None,
        };

        if let Some(element) = &target {
            if let Err(err) = self.resolver.reveal(element).await {
                tracing::warn!(step = %step.id, "could not scroll target into view: {}", err);
            }
        }

        self.target = target;
        self.state.current_step_index = index;
        self.state.current_step = Some(step.clone());
        self.state.is_loading = false;
        self.state.error = None;
        self.persist();

        self.events.emit(TourEvent::StepChange {
            step: step.clone(),
            index,
        });
        self.emit_state();

        let on_step_change = self.definition.hooks.on_step_change.clone();
        let ctx = self.hook_context(Some(step), index);
        let _ = run_hook(on_step_change.as_ref(), ctx, "on_step_change").await;
        Ok(())
    }

    /// Record a structural failure: clear loading, emit the error event and
    /// hand the error back for returning.
    fn fail(&mut self, err: TourError) -> TourError {
        self.state.is_loading = false;
        self.state.error = Some(err.to_string());
        self.report(&err);
        self.emit_state();
        err
    }

    /// Log `err` and emit it as [`TourEvent::Error`].
    fn report(&self, err: &TourError) {
        tracing::error!(tour = %self.definition.id, "{}", err);
        self.events.emit(TourEvent::Error {
            message: err.to_string(),
            step_id: self.state.current_step.as_ref().map(|s| s.id.clone()),
            tour_id: self.definition.id.clone(),
            step_index: self.state.current_step_index,
            timestamp: Utc::now(),
        });
    }

    fn persist(&self) {
        if self.definition.persistence.remember {
            self.store.save(&self.key, &self.state.snapshot());
        }
    }

    fn emit_state(&self) {
        self.events.emit(TourEvent::StateChange(self.state.clone()));
    }

    fn hook_context(&self, step: Option<TourStep>, step_index: usize) -> HookContext {
        HookContext {
            tour_id: self.definition.id.clone(),
            step,
            step_index,
            element: self.target.clone(),
        }
    }

    async fn run_tour_hook(&self, hook: Option<&Hook>, label: &str) {
        let ctx = self.hook_context(self.state.current_step.clone(), self.state.current_step_index);
        let _ = run_hook(hook, ctx, label).await;
    }
}

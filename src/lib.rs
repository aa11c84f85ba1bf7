//! # tourguide
//!
//! Orchestration engine for guided product tours: an ordered list of steps,
//! each pointing at an element on the page, walked one at a time while a
//! presentation layer highlights the element and shows a popover.
//!
//! The crate owns the parts with real rules:
//!
//! - [`engine`]: the step state machine, hooks, persistence and events.
//! - [`resolver`]: finding step targets, optionally waiting for them.
//! - [`position`]: popover placement with viewport-aware fallbacks.
//! - [`dispatch`]: automated step actions and pluggable integrations.
//! - [`storage`]: best-effort progress snapshots.
//!
//! Painting is left to the host. It listens to [`TourEvent`]s and calls
//! back into the engine with user intents.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tourguide::prelude::*;
//!
//! # async fn run() -> tourguide::Result<()> {
//! let dom = Arc::new(MemoryDom::new());
//! let tour = TourDefinition::new(
//!     "welcome",
//!     vec![
//!         TourStep::new("intro", "Welcome").placement(Placement::Center),
//!         TourStep::new("save", "Save your work")
//!             .target("#save")
//!             .wait_for_element(2000),
//!     ],
//! )
//! .remember();
//!
//! let mut engine = TourEngine::new(tour, dom)?;
//! engine.on(EventKind::StepChange, |event| println!("{event:?}"));
//! if engine.should_show_tour() {
//!     engine.start().await?;
//!     engine.next().await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod dispatch;
pub mod dom;
pub mod engine;
pub mod error;
pub mod events;
pub mod hooks;
pub mod position;
pub mod resolver;
pub mod storage;
pub mod types;

pub use error::{Result, TourError};
pub use events::TourEvent;

pub mod prelude {
    pub use crate::dispatch::{ActionDispatcher, Integration};
    pub use crate::dom::{Dom, ElementHandle, MemoryDom, MemoryElement, Target};
    pub use crate::engine::{TourEngine, TourKey, TourState};
    pub use crate::error::{Result, TourError};
    pub use crate::events::{EventKind, TourEvent};
    pub use crate::hooks::{Hook, HookContext};
    pub use crate::position::{Placement, Rect, Size, Viewport};
    pub use crate::storage::{FileStore, MemoryStore, PersistedTourState, PersistenceStore};
    pub use crate::types::{ActionKind, TourAction, TourDefinition, TourStep};
}

//! Typed events for the presentation layer.
//!
//! Listeners attach per [`EventKind`] with [`EventBus::on`], or to everything
//! at once with [`EventBus::subscribe`]. Async consumers can instead take a
//! broadcast receiver or stream from [`EventBus::receiver`] /
//! [`EventBus::stream`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::engine::TourState;
use crate::types::TourStep;

const CHANNEL_CAPACITY: usize = 64;

/// Everything the engine announces.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum TourEvent {
    StepChange {
        step: TourStep,
        index: usize,
    },
    TourStart {
        tour_id: String,
    },
    TourComplete {
        tour_id: String,
    },
    TourSkip {
        tour_id: String,
        step_index: usize,
    },
    Error {
        message: String,
        step_id: Option<String>,
        tour_id: String,
        step_index: usize,
        timestamp: DateTime<Utc>,
    },
    StateChange(TourState),
}

impl TourEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TourEvent::StepChange { .. } => EventKind::StepChange,
            TourEvent::TourStart { .. } => EventKind::TourStart,
            TourEvent::TourComplete { .. } => EventKind::TourComplete,
            TourEvent::TourSkip { .. } => EventKind::TourSkip,
            TourEvent::Error { .. } => EventKind::Error,
            TourEvent::StateChange(_) => EventKind::StateChange,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StepChange,
    TourStart,
    TourComplete,
    TourSkip,
    Error,
    StateChange,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::StepChange,
        EventKind::TourStart,
        EventKind::TourComplete,
        EventKind::TourSkip,
        EventKind::Error,
        EventKind::StateChange,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::StepChange => "step-change",
            EventKind::TourStart => "tour-start",
            EventKind::TourComplete => "tour-complete",
            EventKind::TourSkip => "tour-skip",
            EventKind::Error => "error",
            EventKind::StateChange => "state-change",
        }
    }
}

pub type Listener = Arc<dyn Fn(&TourEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Handle returned by [`EventBus::subscribe`].
#[must_use = "dropping a Subscription keeps the listener attached; call unsubscribe() to detach"]
pub struct Subscription {
    bus: EventBus,
    ids: Vec<(EventKind, ListenerId)>,
}

impl Subscription {
    /// Detach the callback from every event kind at once.
    pub fn unsubscribe(self) {
        let mut listeners = self.bus.listeners();
        listeners.retain(|(kind, id, _)| !self.ids.contains(&(*kind, *id)));
    }
}

struct Inner {
    listeners: Mutex<Vec<(EventKind, ListenerId, Listener)>>,
    next_id: AtomicU64,
    channel: broadcast::Sender<TourEvent>,
}

/// Listener registry plus broadcast channel. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (channel, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                channel,
            }),
        }
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(EventKind, ListenerId, Listener)>> {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&TourEvent) + Send + Sync + 'static,
    {
        self.attach(kind, Arc::new(callback))
    }

    fn attach(&self, kind: EventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners().push((kind, id, listener));
        id
    }

    /// Detach one listener. Returns whether it was attached.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|(k, i, _)| !(*k == kind && *i == id));
        listeners.len() != before
    }

    /// Attach one callback to every event kind.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&TourEvent) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(callback);
        let ids = EventKind::ALL
            .into_iter()
            .map(|kind| (kind, self.attach(kind, listener.clone())))
            .collect();
        Subscription {
            bus: self.clone(),
            ids,
        }
    }

    pub fn receiver(&self) -> broadcast::Receiver<TourEvent> {
        self.inner.channel.subscribe()
    }

    pub fn stream(&self) -> BroadcastStream<TourEvent> {
        BroadcastStream::new(self.receiver())
    }

    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }

    /// Deliver an event to the matching listeners, then to channel receivers.
    ///
    /// Listeners are called outside the registry lock so they may attach or
    /// detach listeners themselves.
    pub fn emit(&self, event: TourEvent) {
        let kind = event.kind();
        let matching: Vec<Listener> = self
            .listeners()
            .iter()
            .filter(|(k, _, _)| *k == kind)
            .map(|(_, _, listener)| listener.clone())
            .collect();
        for listener in matching {
            listener(&event);
        }
        let _ = self.inner.channel.send(event);
    }
}

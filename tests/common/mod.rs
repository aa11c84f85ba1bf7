#![allow(dead_code)]

use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex};

use tourguide::events::Subscription;
use tourguide::prelude::*;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{Layer, Registry};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `n` targetless steps named `step-0`, `step-1`, ...
pub fn plain_steps(n: usize) -> Vec<TourStep> {
    (0..n)
        .map(|i| TourStep::new(format!("step-{i}"), format!("Step {i}")))
        .collect()
}

pub fn engine(definition: TourDefinition) -> TourEngine {
    init_tracing();
    TourEngine::new(definition, Arc::new(MemoryDom::new())).expect("valid tour")
}

/// Engine over `dom` with fresh in-memory persistence.
pub fn engine_on(definition: TourDefinition, dom: Arc<MemoryDom>) -> TourEngine {
    engine_with(definition, dom, PersistenceStore::default())
}

pub fn engine_with(
    definition: TourDefinition,
    dom: Arc<MemoryDom>,
    store: PersistenceStore,
) -> TourEngine {
    init_tracing();
    TourEngine::builder(definition)
        .dom(dom)
        .store(store)
        .build()
        .expect("valid tour")
}

/// Collects every event except state snapshots as short labels such as
/// `step-change(1)`.
pub struct Recorder {
    labels: Arc<Mutex<Vec<String>>>,
    _subscription: Subscription,
}

impl Recorder {
    pub fn attach(engine: &TourEngine) -> Self {
        let labels = Arc::new(Mutex::new(Vec::new()));
        let sink = labels.clone();
        let subscription = engine.subscribe(move |event| {
            let label = match event {
                TourEvent::StateChange(_) => return,
                TourEvent::StepChange { index, .. } => format!("step-change({index})"),
                TourEvent::TourStart { .. } => "tour-start".to_string(),
                TourEvent::TourComplete { .. } => "tour-complete".to_string(),
                TourEvent::TourSkip { step_index, .. } => format!("tour-skip({step_index})"),
                TourEvent::Error { message, .. } => format!("error({message})"),
            };
            sink.lock().unwrap().push(label);
        });
        Self {
            labels,
            _subscription: subscription,
        }
    }

    pub fn labels(&self) -> Vec<String> {
        self.labels.lock().unwrap().clone()
    }
}

/// Warnings logged on the current thread while the returned guard lives,
/// rendered as `message key=value ...`.
pub fn capture_warnings() -> (DefaultGuard, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let subscriber = Registry::default().with(WarnCapture(lines.clone()));
    (tracing::subscriber::set_default(subscriber), lines)
}

struct WarnCapture(Arc<Mutex<Vec<String>>>);

impl<S: tracing::Subscriber> Layer<S> for WarnCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != tracing::Level::WARN {
            return;
        }
        let mut line = LineVisitor::default();
        event.record(&mut line);
        self.0.lock().unwrap().push(format!("{}{}", line.message, line.fields));
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }
}

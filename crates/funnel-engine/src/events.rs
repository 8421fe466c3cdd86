//! Cross-view event bus.
//!
//! Independently mounted boards learn about mutations made elsewhere through
//! an explicit [`EventBus`] instance. Handlers are registered per
//! [`EventKind`] and invoked synchronously on publish; passive observers
//! (loggers, the CLI) can also [`tap`](EventBus::tap) a
//! [`tokio::sync::broadcast`] channel carrying every event.
//!
//! The payload shapes are wire-level: camelCase keys and ISO 8601 timestamps.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    LeadStageChanged,
    LeadCreated,
    LeadDataUpdated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeadStageChanged => "lead-stage-changed",
            Self::LeadCreated => "lead-created",
            Self::LeadDataUpdated => "lead-data-updated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadStageChanged {
    pub lead_id: String,
    pub pipeline_id: String,
    pub from_stage_id: String,
    pub to_stage_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadCreated {
    pub lead_id: String,
    pub pipeline_id: String,
    pub stage_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadDataUpdated {
    pub lead_id: String,
    pub updated_fields: serde_json::Map<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Events published after a mutation has been persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum BoardEvent {
    LeadStageChanged(LeadStageChanged),
    LeadCreated(LeadCreated),
    LeadDataUpdated(LeadDataUpdated),
}

impl BoardEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::LeadStageChanged(_) => EventKind::LeadStageChanged,
            Self::LeadCreated(_) => EventKind::LeadCreated,
            Self::LeadDataUpdated(_) => EventKind::LeadDataUpdated,
        }
    }

    pub fn lead_id(&self) -> &str {
        match self {
            Self::LeadStageChanged(e) => &e.lead_id,
            Self::LeadCreated(e) => &e.lead_id,
            Self::LeadDataUpdated(e) => &e.lead_id,
        }
    }

    /// The pipeline the event belongs to, when the payload carries it.
    pub fn pipeline_id(&self) -> Option<&str> {
        match self {
            Self::LeadStageChanged(e) => Some(&e.pipeline_id),
            Self::LeadCreated(e) => Some(&e.pipeline_id),
            Self::LeadDataUpdated(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

pub type EventHandler = Arc<dyn Fn(&BoardEvent) + Send + Sync>;

struct Entry {
    id: u64,
    kind: EventKind,
    handler: EventHandler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    disposed: bool,
    entries: Vec<Entry>,
}

struct BusInner {
    registry: Mutex<Registry>,
    tap: broadcast::Sender<BoardEvent>,
}

impl BusInner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_registered(&self, id: u64) -> bool {
        self.registry().entries.iter().any(|e| e.id == id)
    }
}

/// Process-wide publish/subscribe channel. Cloning yields another handle to
/// the same bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus whose broadcast tap buffers up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (tap, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                registry: Mutex::new(Registry::default()),
                tap,
            }),
        }
    }

    /// Register `handler` for events of `kind`.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// unsubscribed or dropped. Subscribing to a disposed bus yields an
    /// inactive subscription.
    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: impl Fn(&BoardEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let mut registry = self.inner.registry();
        registry.next_id += 1;
        let id = registry.next_id;
        let active = !registry.disposed;
        if active {
            registry.entries.push(Entry {
                id,
                kind,
                handler: Arc::new(handler),
            });
        }
        Subscription {
            bus: Arc::downgrade(&self.inner),
            id,
            active,
        }
    }

    /// Deliver `event` to every handler registered for its kind and to the tap.
    ///
    /// Handlers run outside the registry lock. A handler unsubscribed while
    /// delivery is under way, including by an earlier handler for the same
    /// event, is skipped. Returns the number of handlers invoked. Publishing
    /// with no subscribers, or on a disposed bus, is a no-op.
    pub fn publish(&self, event: BoardEvent) -> usize {
        let kind = event.kind();
        let handlers: Vec<(u64, EventHandler)> = {
            let registry = self.inner.registry();
            if registry.disposed {
                tracing::debug!(event = kind.as_str(), "Bus disposed, dropping event");
                return 0;
            }
            registry
                .entries
                .iter()
                .filter(|e| e.kind == kind)
                .map(|e| (e.id, e.handler.clone()))
                .collect()
        };
        let mut invoked = 0;
        for (id, handler) in &handlers {
            if !self.inner.is_registered(*id) {
                continue;
            }
            handler(&event);
            invoked += 1;
        }
        tracing::debug!(
            event = kind.as_str(),
            lead_id = %event.lead_id(),
            handlers = invoked,
            "Event published"
        );
        let _ = self.inner.tap.send(event);
        invoked
    }

    /// Receive every published event, regardless of kind.
    pub fn tap(&self) -> broadcast::Receiver<BoardEvent> {
        self.inner.tap.subscribe()
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner
            .registry()
            .entries
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    /// Drop every handler and refuse further deliveries.
    pub fn dispose(&self) {
        let mut registry = self.inner.registry();
        registry.disposed = true;
        registry.entries.clear();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.registry().disposed
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Handle for a registered handler. Dropping it unsubscribes.
pub struct Subscription {
    bus: Weak<BusInner>,
    id: u64,
    active: bool,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            let id = self.id;
            bus.registry().entries.retain(|e| e.id != id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

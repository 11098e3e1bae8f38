// Purpose: Defines the Observer trait for subscribing to events from a running simulation
//
// This module provides the reporting surface: workers and the controller push
// events into an ObserverRegistry, which fans them out to every registered
// observer.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::config::BatchMode;
use crate::control::Command;
use crate::order::Order;
use crate::worker::WorkerId;

/// Point-in-time view of a running simulation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub queue_len: usize,
    pub capacity: usize,
    pub production_paused: bool,
    pub delivery_paused: bool,
    /// Completed batches
    pub batch: u64,
    /// Participants currently waiting at the barrier
    pub waiting: usize,
    pub participants: usize,
    pub produced: u64,
    pub consumed: u64,
}

/// Everything a simulation reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    SimulationStarted {
        seed: u64,
        chefs: usize,
        deliverers: usize,
        capacity: usize,
        batch_size: u32,
        batch_mode: BatchMode,
    },
    OrderPrepared {
        worker: WorkerId,
        order: Order,
    },
    OrderDelivered {
        worker: WorkerId,
        order: Order,
    },
    /// A worker used up its quota and is waiting for `batch` to close
    WorkerWaiting {
        worker: WorkerId,
        batch: u64,
    },
    /// The barrier released; `income` is cumulative over the run
    BatchCompleted {
        batch: u64,
        published_by: String,
        income: BTreeMap<String, u64>,
        total_cents: u64,
    },
    /// A summary was requested before every worker reached the barrier
    BatchSummaryDeferred {
        waiting: usize,
        participants: usize,
    },
    ControlApplied {
        command: Command,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<StatusSnapshot>,
    },
    WorkerStopped {
        worker: WorkerId,
        handled: u64,
    },
    SimulationStopped {
        produced: u64,
        consumed: u64,
        residual: usize,
    },
}

/// Discriminant of `EventKind`, used for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SimulationStarted,
    OrderPrepared,
    OrderDelivered,
    WorkerWaiting,
    BatchCompleted,
    BatchSummaryDeferred,
    ControlApplied,
    WorkerStopped,
    SimulationStopped,
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::SimulationStarted { .. } => EventType::SimulationStarted,
            EventKind::OrderPrepared { .. } => EventType::OrderPrepared,
            EventKind::OrderDelivered { .. } => EventType::OrderDelivered,
            EventKind::WorkerWaiting { .. } => EventType::WorkerWaiting,
            EventKind::BatchCompleted { .. } => EventType::BatchCompleted,
            EventKind::BatchSummaryDeferred { .. } => EventType::BatchSummaryDeferred,
            EventKind::ControlApplied { .. } => EventType::ControlApplied,
            EventKind::WorkerStopped { .. } => EventType::WorkerStopped,
            EventKind::SimulationStopped { .. } => EventType::SimulationStopped,
        }
    }

    /// The worker this event is about, if any
    pub fn worker(&self) -> Option<WorkerId> {
        match self {
            EventKind::OrderPrepared { worker, .. }
            | EventKind::OrderDelivered { worker, .. }
            | EventKind::WorkerWaiting { worker, .. }
            | EventKind::WorkerStopped { worker, .. } => Some(*worker),
            _ => None,
        }
    }
}

/// A timestamped event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl SimulationEvent {
    pub fn now(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }
}

/// Filter to select specific events
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by event types
    pub event_types: Option<Vec<EventType>>,
    /// Filter by worker
    pub workers: Option<Vec<WorkerId>>,
}

impl EventFilter {
    /// Create a new empty filter (matches all events)
    pub fn new() -> Self {
        Self::default()
    }

    /// Add event type filter
    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_types.get_or_insert_with(Vec::new).push(event_type);
        self
    }

    /// Add worker filter
    pub fn with_worker(mut self, worker: WorkerId) -> Self {
        self.workers.get_or_insert_with(Vec::new).push(worker);
        self
    }

    /// Check if an event matches this filter
    pub fn matches(&self, event: &SimulationEvent) -> bool {
        if let Some(event_types) = &self.event_types {
            if !event_types.contains(&event.event_type()) {
                return false;
            }
        }

        if let Some(workers) = &self.workers {
            match event.kind.worker() {
                Some(worker) if workers.contains(&worker) => {}
                // Events without a worker never match a worker filter
                _ => return false,
            }
        }

        true
    }
}

/// Trait for observing simulation events
pub trait Observer: Send + Sync {
    /// Called for every event, in the order the registry received them
    fn on_event(&self, event: &SimulationEvent);
}

/// Callback type for handling events
pub type EventCallback = Box<dyn Fn(&SimulationEvent) + Send + Sync>;

/// An observer that forwards events to a callback function
pub struct CallbackObserver {
    name: String,
    callback: EventCallback,
    filter: Option<EventFilter>,
}

impl CallbackObserver {
    /// Create a new callback observer
    pub fn new(name: impl Into<String>, filter: Option<EventFilter>, callback: EventCallback) -> Self {
        Self {
            name: name.into(),
            callback,
            filter,
        }
    }

    /// Set a filter for this observer
    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Get the name of this observer
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Observer for CallbackObserver {
    fn on_event(&self, event: &SimulationEvent) {
        if let Some(filter) = &self.filter {
            if !filter.matches(event) {
                return;
            }
        }
        (self.callback)(event);
    }
}

/// An observer that stores events in memory
#[derive(Default)]
pub struct MemoryObserver {
    events: Mutex<Vec<SimulationEvent>>,
    filter: Option<EventFilter>,
}

impl MemoryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a filter for this observer
    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Get all stored events
    pub fn events(&self) -> Vec<SimulationEvent> {
        lock_or_recover(&self.events).clone()
    }

    /// Number of stored events of one type
    pub fn count_of(&self, event_type: EventType) -> usize {
        lock_or_recover(&self.events)
            .iter()
            .filter(|event| event.event_type() == event_type)
            .count()
    }

    /// Clear all stored events
    pub fn clear(&self) {
        lock_or_recover(&self.events).clear();
    }
}

impl Observer for MemoryObserver {
    fn on_event(&self, event: &SimulationEvent) {
        if let Some(filter) = &self.filter {
            if !filter.matches(event) {
                return;
            }
        }
        lock_or_recover(&self.events).push(event.clone());
    }
}

/// An observer that sends events to a channel
pub struct ChannelObserver {
    sender: UnboundedSender<SimulationEvent>,
    filter: Option<EventFilter>,
}

impl ChannelObserver {
    /// Create a new channel observer and the receiving end
    pub fn new() -> (Self, UnboundedReceiver<SimulationEvent>) {
        let (sender, receiver) = unbounded_channel();
        (
            Self {
                sender,
                filter: None,
            },
            receiver,
        )
    }

    /// Set a filter for this observer
    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

impl Observer for ChannelObserver {
    fn on_event(&self, event: &SimulationEvent) {
        if let Some(filter) = &self.filter {
            if !filter.matches(event) {
                return;
            }
        }
        // A dropped receiver just means nobody is listening any more
        let _ = self.sender.send(event.clone());
    }
}

/// Registry for managing multiple observers
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    observers: Arc<Mutex<Vec<Arc<dyn Observer>>>>,
}

impl ObserverRegistry {
    /// Create a new observer registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new observer
    pub fn register(&self, observer: Arc<dyn Observer>) {
        lock_or_recover(&self.observers).push(observer);
    }

    /// Timestamp `kind` and deliver it to every observer
    pub fn notify(&self, kind: EventKind) {
        let event = SimulationEvent::now(kind);
        // Observers run outside the lock so they may register others
        let observers = lock_or_recover(&self.observers).clone();
        for observer in observers.iter() {
            observer.on_event(&event);
        }
    }

    /// Get the number of registered observers
    pub fn observer_count(&self) -> usize {
        lock_or_recover(&self.observers).len()
    }
}

// An observer that panicked must not silence the others.
fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

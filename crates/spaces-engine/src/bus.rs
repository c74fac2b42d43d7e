//! Publish/subscribe for hierarchy events.
//!
//! Two dispatchers share one subscriber registry shape:
//! - [`SyncDispatcher`] runs every handler inline, in subscription order, and
//!   returns after the last one finishes. Aggregates are read right after a
//!   mutation, so this is the one wired into consistency-critical paths.
//! - [`AsyncDispatcher`] hands each handler to the runtime's blocking pool and
//!   returns immediately, with no ordering guarantee.
//!
//! Handler errors and panics are contained per invocation and only logged.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use spaces_core::{EventKind, HandlerError, SpaceEvent};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{error, trace, warn};

/// A subscriber. Must be fast and must not block on the publisher.
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;
    fn handle(&self, event: &SpaceEvent) -> Result<(), HandlerError>;
}

pub trait EventBus: Send + Sync {
    fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>);
    fn dispatch(&self, event: SpaceEvent);
    fn subscriber_count(&self, kind: EventKind) -> usize;
    fn stats(&self) -> BusStatsSnapshot;
}

struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&SpaceEvent) -> Result<(), HandlerError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, event: &SpaceEvent) -> Result<(), HandlerError> {
        (self.f)(event)
    }
}

/// Wrap a closure as a handler.
pub fn handler_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(&SpaceEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}

/// Per-kind subscriber lists, each behind its own lock.
///
/// All kinds are present from construction, so the outer map is never written.
pub struct SubscriberRegistry {
    lists: HashMap<EventKind, RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            lists: EventKind::ALL
                .iter()
                .map(|kind| (*kind, RwLock::new(Vec::new())))
                .collect(),
        }
    }

    pub fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        if let Some(list) = self.lists.get(&kind) {
            list.write().push(handler);
        }
    }

    /// Copy of the current list. Dispatch iterates this, never the live list.
    pub fn snapshot(&self, kind: EventKind) -> Vec<Arc<dyn EventHandler>> {
        self.lists
            .get(&kind)
            .map(|list| list.read().clone())
            .unwrap_or_default()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.lists.get(&kind).map_or(0, |list| list.read().len())
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct BusStats {
    dispatched: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BusStatsSnapshot {
    pub dispatched: u64,
    pub delivered: u64,
    pub failed: u64,
    pub panicked: u64,
}

impl BusStats {
    fn snapshot(&self) -> BusStatsSnapshot {
        BusStatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

/// Run one handler, containing its error or panic.
fn invoke(handler: &dyn EventHandler, event: &SpaceEvent, stats: &BusStats) {
    let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(event)));
    match outcome {
        Ok(Ok(())) => {
            stats.delivered.fetch_add(1, Ordering::Relaxed);
            trace!(
                handler = handler.name(),
                kind = %event.kind(),
                node_id = %event.node_id(),
                "event handled"
            );
        }
        Ok(Err(e)) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                handler = handler.name(),
                kind = %event.kind(),
                error = %e,
                "event handler failed"
            );
        }
        Err(panic) => {
            stats.panicked.fetch_add(1, Ordering::Relaxed);
            error!(
                handler = handler.name(),
                kind = %event.kind(),
                panic = %panic_message(panic.as_ref()),
                "event handler panicked"
            );
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Inline dispatcher.
#[derive(Default)]
pub struct SyncDispatcher {
    registry: SubscriberRegistry,
    stats: BusStats,
}

impl SyncDispatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventBus for SyncDispatcher {
    fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.registry.subscribe(kind, handler);
    }

    fn dispatch(&self, event: SpaceEvent) {
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
        for handler in self.registry.snapshot(event.kind()) {
            invoke(handler.as_ref(), &event, &self.stats);
        }
    }

    fn subscriber_count(&self, kind: EventKind) -> usize {
        self.registry.count(kind)
    }

    fn stats(&self) -> BusStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Fire-and-forget dispatcher backed by a tokio runtime.
pub struct AsyncDispatcher {
    registry: SubscriberRegistry,
    stats: Arc<BusStats>,
    runtime: Handle,
}

impl AsyncDispatcher {
    pub fn new(runtime: Handle) -> Self {
        Self {
            registry: SubscriberRegistry::new(),
            stats: Arc::new(BusStats::default()),
            runtime,
        }
    }

    /// Dispatcher on the ambient runtime, if there is one.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    /// Spawn one blocking task per subscriber and hand back their handles.
    pub fn spawn_handlers(&self, event: SpaceEvent) -> Vec<JoinHandle<()>> {
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
        let event = Arc::new(event);
        self.registry
            .snapshot(event.kind())
            .into_iter()
            .map(|handler| {
                let event = Arc::clone(&event);
                let stats = Arc::clone(&self.stats);
                self.runtime
                    .spawn_blocking(move || invoke(handler.as_ref(), &event, &stats))
            })
            .collect()
    }
}

impl EventBus for AsyncDispatcher {
    fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.registry.subscribe(kind, handler);
    }

    fn dispatch(&self, event: SpaceEvent) {
        drop(self.spawn_handlers(event));
    }

    fn subscriber_count(&self, kind: EventKind) -> usize {
        self.registry.count(kind)
    }

    fn stats(&self) -> BusStatsSnapshot {
        self.stats.snapshot()
    }
}

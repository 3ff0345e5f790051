//! Listener registration and synchronous dispatch.

use crate::events::{ClusterEvent, EventKind};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Result type for event listener invocations.
///
/// An error is logged and isolated; remaining listeners for the same
/// event still run.
pub type EventListenerResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Opaque token identifying the module that registered a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventOwner(Uuid);

impl EventOwner {
    /// Mint a fresh owner token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventOwner {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler for one event kind.
///
/// Runs synchronously on the task that called
/// [`EventBus::call_event`]; long or blocking work must be handed off.
/// The mutable reference lets configure-style events collect data and
/// cancelable events flip their flag.
pub trait EventListener: Send + Sync {
    /// Handle one event.
    fn handle(&self, event: &mut ClusterEvent) -> EventListenerResult;
}

struct RegisteredListener {
    owner: EventOwner,
    listener: Arc<dyn EventListener>,
}

/// In-process typed event bus.
///
/// Listeners are keyed by [`EventKind`] and invoked in registration
/// order. The table is snapshotted per dispatch, so registration from
/// inside a listener takes effect from the next event on.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<EventKind, Vec<RegisteredListener>>>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `kind`, tagged with `owner`.
    pub fn register(&self, kind: EventKind, owner: EventOwner, listener: Arc<dyn EventListener>) {
        self.listeners
            .write()
            .entry(kind)
            .or_default()
            .push(RegisteredListener { owner, listener });
    }

    /// Register `listener` for several kinds at once.
    pub fn register_all(
        &self,
        kinds: &[EventKind],
        owner: EventOwner,
        listener: Arc<dyn EventListener>,
    ) {
        for kind in kinds {
            self.register(*kind, owner, Arc::clone(&listener));
        }
    }

    /// Remove all and only the listeners registered by `owner`.
    pub fn unregister_by_owner(&self, owner: EventOwner) {
        let mut table = self.listeners.write();
        table.retain(|_, entries| {
            entries.retain(|entry| entry.owner != owner);
            !entries.is_empty()
        });
    }

    /// Total number of registered listeners across all kinds.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().values().map(Vec::len).sum()
    }

    /// Dispatch `event` to its listeners, in registration order, on the
    /// calling task.
    ///
    /// Returns `true` when the event may proceed — i.e. it is not a
    /// cancelable event that a listener cancelled.
    pub fn call_event(&self, event: &mut ClusterEvent) -> bool {
        let snapshot: Vec<Arc<dyn EventListener>> = {
            let table = self.listeners.read();
            match table.get(&event.kind()) {
                Some(entries) => entries.iter().map(|e| Arc::clone(&e.listener)).collect(),
                None => Vec::new(),
            }
        };

        for listener in snapshot {
            if let Err(error) = listener.handle(event) {
                warn!(
                    kind = ?event.kind(),
                    error = %error,
                    "event listener failed; continuing with remaining listeners"
                );
            }
        }

        !event.is_cancelled()
    }
}

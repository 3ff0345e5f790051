//! Cluster service registry.
//!
//! Holds the latest accepted snapshot per service and enforces the
//! lifecycle non-regression invariant across publishes.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use stratus_types::{ServiceInfoSnapshot, ServiceLifecycle};
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of offering a snapshot to the registry.
#[derive(Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The snapshot replaced the registry entry.
    Accepted {
        /// Lifecycle the replaced entry carried; `None` for the first
        /// snapshot of a service.
        previous: Option<ServiceLifecycle>,
    },
    /// The snapshot would have moved the lifecycle backwards and was
    /// rejected; the previous entry stands.
    LifecycleRegression {
        /// Lifecycle currently on record.
        current: ServiceLifecycle,
        /// Lifecycle the rejected snapshot carried.
        offered: ServiceLifecycle,
    },
}

impl UpdateOutcome {
    /// Whether the snapshot was accepted.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Latest accepted snapshot per service instance.
#[derive(Default)]
pub struct ServiceRegistry {
    services: DashMap<Uuid, ServiceInfoSnapshot>,
    regressions_rejected: AtomicU64,
}

impl ServiceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a published snapshot.
    ///
    /// Re-publishing an identical snapshot is accepted (and harmless);
    /// only a lifecycle regression is refused. The agent may be mid
    /// restart, so the offending publish is dropped rather than the
    /// agent disconnected — a later consistent publish heals the view.
    pub fn apply_update(&self, snapshot: ServiceInfoSnapshot) -> UpdateOutcome {
        let instance_id = snapshot.service_id().instance_id;

        match self.services.entry(instance_id) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let current = entry.get().lifecycle;
                if !current.can_transition_to(snapshot.lifecycle) {
                    self.regressions_rejected.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        service = %snapshot.service_id(),
                        current = %current,
                        offered = %snapshot.lifecycle,
                        "rejecting lifecycle regression"
                    );
                    return UpdateOutcome::LifecycleRegression {
                        current,
                        offered: snapshot.lifecycle,
                    };
                }
                entry.insert(snapshot);
                UpdateOutcome::Accepted { previous: Some(current) }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                debug!(service = %snapshot.service_id(), "registering service snapshot");
                entry.insert(snapshot);
                UpdateOutcome::Accepted { previous: None }
            }
        }
    }

    /// Remove a service's entry, returning the last snapshot.
    pub fn remove(&self, instance_id: &Uuid) -> Option<ServiceInfoSnapshot> {
        self.services.remove(instance_id).map(|(_, snapshot)| snapshot)
    }

    /// Latest snapshot for one service.
    #[must_use]
    pub fn snapshot(&self, instance_id: &Uuid) -> Option<ServiceInfoSnapshot> {
        self.services.get(instance_id).map(|entry| entry.value().clone())
    }

    /// Latest snapshot for a service found by display name.
    #[must_use]
    pub fn snapshot_by_name(&self, name: &str) -> Option<ServiceInfoSnapshot> {
        self.services
            .iter()
            .find(|entry| entry.value().service_id().name == name)
            .map(|entry| entry.value().clone())
    }

    /// Snapshots of every known service.
    #[must_use]
    pub fn snapshots(&self) -> Vec<ServiceInfoSnapshot> {
        self.services.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of tracked services.
    #[must_use]
    pub fn count(&self) -> usize {
        self.services.len()
    }

    /// How many lifecycle regressions have been refused.
    #[must_use]
    pub fn regressions_rejected(&self) -> u64 {
        self.regressions_rejected.load(Ordering::Relaxed)
    }
}

//! Service identity, configuration, and runtime snapshots.
//!
//! A *service* is one managed worker process. Its identity
//! ([`ServiceId`]) and desired state ([`ServiceConfiguration`]) are
//! assigned once at provisioning time by the node; its runtime state is
//! reported by the wrapper as a stream of immutable
//! [`ServiceInfoSnapshot`] value objects.

use crate::document::Document;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use uuid::Uuid;

/// The runtime environment a service is provisioned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvironmentKind {
    /// A backend game/application server instance.
    Server,
    /// A player-facing proxy instance.
    Proxy,
    /// A generic managed worker with no session tier.
    Worker,
}

/// Immutable identity of a managed service, assigned at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId {
    /// Globally unique instance id.
    pub instance_id: Uuid,
    /// Display name, unique within the cluster (e.g. `Lobby-1`).
    pub name: String,
    /// The task this instance was provisioned from (e.g. `Lobby`).
    pub task_name: String,
    /// Name of the node that owns this service.
    pub node_id: String,
    /// Runtime environment kind.
    pub environment: EnvironmentKind,
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.node_id)
    }
}

/// A template applied to a service's working directory at preparation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTemplate {
    /// Template namespace (usually the task name).
    pub prefix: String,
    /// Template name within the namespace.
    pub name: String,
    /// The storage backend holding the template (e.g. `local`).
    pub storage: String,
}

impl fmt::Display for ServiceTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.storage, self.prefix, self.name)
    }
}

/// Desired static state of a service.
///
/// Write-once per worker lifetime; changing any of this means
/// provisioning a new worker, never mutating a running one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfiguration {
    /// The identity this configuration belongs to.
    pub service_id: ServiceId,
    /// Group memberships used for template inclusion and message targeting.
    pub groups: Vec<String>,
    /// Templates applied at preparation, in order.
    pub templates: Vec<ServiceTemplate>,
    /// Maximum heap for the managed process, in megabytes.
    pub max_heap_mb: u32,
    /// Extra process arguments passed to the managed workload.
    pub process_arguments: Vec<String>,
    /// Port the service binds once running.
    pub port: u16,
    /// Whether the service should be deleted instead of stopped on exit.
    pub auto_delete_on_stop: bool,
    /// Free-form provisioning properties.
    pub properties: Document,
}

/// Lifecycle of a managed service within one worker process run.
///
/// The order is monotone: the authority rejects any publish that would
/// move a service backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceLifecycle {
    /// Provisioned, working directory prepared, process not started.
    Prepared,
    /// Process started and connected.
    Running,
    /// Process exited or was stopped.
    Stopped,
    /// Removed from the cluster; terminal.
    Deleted,
}

impl ServiceLifecycle {
    /// Whether moving from `self` to `next` is a forward transition.
    ///
    /// Re-publishing the same lifecycle is allowed (snapshot refreshes
    /// keep the lifecycle while metrics change underneath).
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        next >= self
    }
}

impl fmt::Display for ServiceLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Prepared => "prepared",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// State of one thread in the managed process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    /// OS thread id.
    pub id: u64,
    /// Thread name, if the platform exposes one.
    pub name: String,
    /// Coarse scheduler state (e.g. `runnable`, `sleeping`).
    pub state: String,
}

/// Point-in-time process metrics for a managed worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    /// Resident heap usage in bytes.
    pub heap_usage_bytes: u64,
    /// Non-heap (native) memory usage in bytes.
    pub no_heap_usage_bytes: u64,
    /// Configured heap ceiling in bytes.
    pub max_heap_bytes: u64,
    /// Per-thread states at sampling time.
    pub threads: Vec<ThreadSnapshot>,
    /// Process CPU usage in percent of one core.
    pub cpu_usage_percent: f64,
    /// OS process id, `-1` when the process is not running.
    pub pid: i32,
}

impl ProcessSnapshot {
    /// An empty snapshot for services whose process has not started.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            heap_usage_bytes: 0,
            no_heap_usage_bytes: 0,
            max_heap_bytes: 0,
            threads: Vec::new(),
            cpu_usage_percent: -1.0,
            pid: -1,
        }
    }
}

/// Immutable point-in-time description of a service's runtime state.
///
/// Each publish produces a new instance; holders retain only a
/// current/previous pair and swap them together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfoSnapshot {
    /// Unix millis when the snapshot was created.
    pub creation_time_millis: u64,
    /// Address the service is reachable at.
    pub address: SocketAddr,
    /// Unix millis when the wrapper's channel connected, `0` before that.
    pub connected_time_millis: u64,
    /// Lifecycle stage at snapshot time.
    pub lifecycle: ServiceLifecycle,
    /// Sampled process metrics.
    pub process: ProcessSnapshot,
    /// Collaborator-attached properties, carried forward between snapshots.
    pub properties: Document,
    /// The immutable configuration this service was provisioned with.
    pub configuration: ServiceConfiguration,
}

impl ServiceInfoSnapshot {
    /// The identity this snapshot describes.
    #[must_use]
    pub fn service_id(&self) -> &ServiceId {
        &self.configuration.service_id
    }
}

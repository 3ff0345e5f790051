//! # Stratus Node
//!
//! The cluster authority: accepts agent connections, authorizes them,
//! tracks every service's latest snapshot, answers driver-API queries,
//! owns the authoritative permission store, and relays channel
//! messages between components.
//!
//! The [`Node`] struct is the explicit context object for the
//! authority process — constructed once, passed by reference, no
//! ambient global lookup.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod api;
pub mod auth;
pub mod config;
pub mod messenger;
pub mod permissions;
pub mod registry;
pub mod service_info;

pub use api::CommandExecutor;
pub use auth::{AgentEntry, AgentTable};
pub use config::NodeConfig;
pub use permissions::{NodePermissionStore, PermissionStoreError};
pub use registry::{ServiceRegistry, UpdateOutcome};

use crate::api::DriverApiListener;
use crate::auth::{AuthorizationListener, NodeChannelHandler};
use crate::messenger::ChannelMessageRelayListener;
use crate::service_info::ServiceInfoPublishListener;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use stratus_bus::EventBus;
use stratus_net::{channels, ListenerOwner, NetworkError, NetworkServer};
use stratus_telemetry::LogLevelHandle;
use stratus_types::{
    ProcessSnapshot, ServiceConfiguration, ServiceInfoSnapshot, ServiceLifecycle, ServiceTemplate,
};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Node startup failures.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Binding the agent listener failed.
    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Shared state every node listener operates on.
pub struct NodeState {
    pub(crate) config: NodeConfig,
    pub(crate) event_bus: Arc<EventBus>,
    pub(crate) registry: ServiceRegistry,
    pub(crate) permissions: NodePermissionStore,
    pub(crate) agents: AgentTable,
    pub(crate) provisioned: DashMap<Uuid, ServiceConfiguration>,
    pub(crate) templates: DashMap<String, Vec<ServiceTemplate>>,
    pub(crate) command_executor: RwLock<Option<Arc<dyn CommandExecutor>>>,
    pub(crate) log_level: Option<LogLevelHandle>,
}

/// The authority context: one per node process.
pub struct Node {
    state: Arc<NodeState>,
    server: NetworkServer,
    core_owner: ListenerOwner,
}

impl Node {
    /// Wire up the authority. Nothing touches the network until
    /// [`start`](Self::start).
    ///
    /// `log_level` lets the global log-level channel steer this
    /// process's telemetry as well; pass `None` to leave it fixed.
    #[must_use]
    pub fn new(config: NodeConfig, log_level: Option<LogLevelHandle>) -> Self {
        let state = Arc::new(NodeState {
            config,
            event_bus: Arc::new(EventBus::new()),
            registry: ServiceRegistry::new(),
            permissions: NodePermissionStore::new(),
            agents: AgentTable::new(),
            provisioned: DashMap::new(),
            templates: DashMap::new(),
            command_executor: RwLock::new(None),
            log_level,
        });

        let server = NetworkServer::new(Arc::new(NodeChannelHandler::new(Arc::clone(&state))));

        let core_owner = ListenerOwner::new();
        let registry = server.registry();
        registry.add_listener(
            channels::AUTHORIZATION,
            core_owner,
            Arc::new(AuthorizationListener::new(Arc::clone(&state))),
        );
        registry.add_listener(
            channels::SERVICE_INFO_PUBLISH,
            core_owner,
            Arc::new(ServiceInfoPublishListener::new(Arc::clone(&state))),
        );
        registry.add_listener(
            channels::DRIVER_API,
            core_owner,
            Arc::new(DriverApiListener::new(Arc::clone(&state))),
        );
        registry.add_listener(
            channels::CHANNEL_MESSAGING,
            core_owner,
            Arc::new(ChannelMessageRelayListener::new(Arc::clone(&state))),
        );

        Self { state, server, core_owner }
    }

    /// Bind the agent listener. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr, NodeError> {
        let addr = self.server.bind(self.state.config.bind_addr).await?;
        info!(node = %self.state.config.name, addr = %addr, "node started");
        Ok(addr)
    }

    /// Stop accepting agents and close every channel.
    pub fn shutdown(&self) {
        info!(node = %self.state.config.name, "node shutting down");
        self.server.close();
    }

    /// Announce a service this node will accept an agent for.
    ///
    /// Authorization requires the connecting agent's identity to match
    /// a provisioned configuration exactly.
    pub fn provision(&self, configuration: ServiceConfiguration) {
        info!(service = %configuration.service_id, "service provisioned");
        let mut event =
            stratus_bus::ClusterEvent::ServiceRegistered(initial_snapshot(&configuration, 0));
        self.state.event_bus.call_event(&mut event);
        self.state
            .provisioned
            .insert(configuration.service_id.instance_id, configuration);
    }

    /// Forget a provisioned service and drop its registry entry.
    pub fn unprovision(&self, instance_id: &Uuid) {
        self.state.provisioned.remove(instance_id);
        if let Some(snapshot) = self.state.registry.remove(instance_id) {
            let mut event = stratus_bus::ClusterEvent::ServiceUnregistered(snapshot);
            self.state.event_bus.call_event(&mut event);
        }
    }

    /// Register the template list served for `storage`.
    pub fn register_templates(&self, storage: impl Into<String>, templates: Vec<ServiceTemplate>) {
        self.state.templates.insert(storage.into(), templates);
    }

    /// Install the executor backing impersonated command lines.
    pub fn set_command_executor(&self, executor: Arc<dyn CommandExecutor>) {
        *self.state.command_executor.write() = Some(executor);
    }

    /// This node's configuration.
    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.state.config
    }

    /// The in-process event bus.
    #[must_use]
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.state.event_bus
    }

    /// The cluster service registry.
    #[must_use]
    pub fn services(&self) -> &ServiceRegistry {
        &self.state.registry
    }

    /// The authoritative permission store.
    #[must_use]
    pub fn permissions(&self) -> &NodePermissionStore {
        &self.state.permissions
    }

    /// The authorized agent table.
    #[must_use]
    pub fn agents(&self) -> &AgentTable {
        &self.state.agents
    }

    /// Owner token of the node's own core listeners.
    #[must_use]
    pub fn core_listener_owner(&self) -> ListenerOwner {
        self.core_owner
    }

    /// The process-wide packet listener registry of the agent server.
    #[must_use]
    pub fn packet_registry(&self) -> &Arc<stratus_net::PacketListenerRegistry> {
        self.server.registry()
    }
}

/// First registry entry for a freshly authorized service: `Prepared`,
/// no process metrics yet, properties from the provisioned
/// configuration.
pub(crate) fn initial_snapshot(
    configuration: &ServiceConfiguration,
    connected_time_millis: u64,
) -> ServiceInfoSnapshot {
    ServiceInfoSnapshot {
        creation_time_millis: now_millis(),
        address: SocketAddr::new(
            std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            configuration.port,
        ),
        connected_time_millis,
        lifecycle: ServiceLifecycle::Prepared,
        process: ProcessSnapshot::empty(),
        properties: configuration.properties.clone(),
        configuration: configuration.clone(),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

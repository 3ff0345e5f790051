//! # Stratus Wrapper
//!
//! The in-worker agent: connects to the authority, passes the
//! authorization handshake, keeps the service's snapshot synchronized,
//! replicates permission mutations, and exposes the driver API to the
//! embedding process and its collaborator modules.
//!
//! The [`Wrapper`] struct is the explicit context object — it is
//! constructed once per process and passed by reference to everything
//! that needs it; there is no ambient global instance.
//!
//! ## Startup sequence
//!
//! 1. Connect the TCP channel to the authority.
//! 2. Run the authorization handshake (bounded wait). Denial or
//!    timeout is fatal; supervision and retry live outside this crate.
//! 3. Store the assigned runtime configuration and announce it on the
//!    event bus.
//! 4. Initialize the permission cache.
//! 5. Publish the first `Running` snapshot.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod api;
pub mod config;
pub mod messenger;
pub mod network;
pub mod permissions;
pub mod sync;

pub use api::{DriverApiClient, DriverApiError};
pub use config::WrapperOptions;
pub use messenger::Messenger;
pub use permissions::{CachedPermissionStore, NoopPermissionHandler, PermissionHandler};
pub use sync::ServiceInfoSync;

use crate::network::{
    ChannelMessageListener, GlobalLogLevelListener, PermissionPushListener,
    ServiceInfoUpdateListener, WrapperChannelHandler,
};
use parking_lot::RwLock;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use stratus_bus::{ClusterEvent, EventBus};
use stratus_net::{
    channels, AuthorizationRequest, Handshake, HandshakeError, ListenerOwner, NetworkChannel,
    NetworkClient, NetworkError, QueryManager, QueryResponseListener,
};
use stratus_telemetry::LogLevelHandle;
use stratus_types::{Document, ServiceConfiguration, ServiceId};
use thiserror::Error;
use tracing::info;

/// Interval of the pending-query expiry sweep.
const QUERY_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Why the wrapper failed to start or operate.
#[derive(Debug, Error)]
pub enum WrapperError {
    /// Connection setup failed.
    #[error(transparent)]
    Network(#[from] NetworkError),
    /// The authority denied us, or never answered.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    /// A driver-API call failed.
    #[error(transparent)]
    Api(#[from] DriverApiError),
}

/// The agent context: one per worker process.
pub struct Wrapper {
    options: WrapperOptions,
    client: Arc<NetworkClient>,
    queries: Arc<QueryManager>,
    event_bus: Arc<EventBus>,
    api: Arc<DriverApiClient>,
    permissions: Arc<CachedPermissionStore>,
    sync: Arc<ServiceInfoSync>,
    messenger: Messenger,
    handshake: Handshake,
    runtime_configuration: RwLock<Document>,
    core_owner: ListenerOwner,
}

impl Wrapper {
    /// Wire up the agent. Nothing touches the network until
    /// [`start`](Self::start).
    ///
    /// `log_level` connects the global log-level channel to this
    /// process's telemetry; pass `None` to ignore level pushes.
    #[must_use]
    pub fn new(options: WrapperOptions, log_level: Option<LogLevelHandle>) -> Arc<Self> {
        let event_bus = Arc::new(EventBus::new());
        let client = Arc::new(NetworkClient::new(Arc::new(WrapperChannelHandler::new(
            Arc::clone(&event_bus),
        ))));
        let queries = Arc::new(QueryManager::new());
        let api = Arc::new(DriverApiClient::new(
            Arc::clone(&client),
            Arc::clone(&queries),
            options.query_timeout,
        ));
        let permissions = Arc::new(CachedPermissionStore::new(Arc::clone(&api)));

        let service_address = SocketAddr::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            options.service_configuration.port,
        );
        let sync = Arc::new(ServiceInfoSync::new(
            options.service_configuration.clone(),
            service_address,
            Arc::clone(&event_bus),
        ));

        let core_owner = ListenerOwner::new();
        let registry = client.registry();
        registry.add_listener(
            channels::DRIVER_API,
            core_owner,
            Arc::new(QueryResponseListener::new(Arc::clone(&queries))),
        );
        registry.add_listener(
            channels::SERVICE_INFO_PUBLISH,
            core_owner,
            Arc::new(ServiceInfoUpdateListener::new(Arc::clone(&event_bus))),
        );
        registry.add_listener(
            channels::PERMISSIONS_PUBLISH,
            core_owner,
            Arc::new(PermissionPushListener::new(Arc::clone(&permissions))),
        );
        registry.add_listener(
            channels::CHANNEL_MESSAGING,
            core_owner,
            Arc::new(ChannelMessageListener::new(Arc::clone(&event_bus))),
        );
        registry.add_listener(
            channels::GLOBAL_LOG_LEVEL,
            core_owner,
            Arc::new(GlobalLogLevelListener::new(log_level)),
        );

        let messenger = Messenger::new(Arc::clone(&client));

        Arc::new(Self {
            options,
            client,
            queries,
            event_bus,
            api,
            permissions,
            sync,
            messenger,
            handshake: Handshake::new(),
            runtime_configuration: RwLock::new(Document::new()),
            core_owner,
        })
    }

    /// Connect, authorize, and bring the agent to steady state.
    ///
    /// Fatal on denial or handshake timeout: the process must not keep
    /// running half-authorized.
    pub async fn start(&self) -> Result<(), WrapperError> {
        let channel = self.client.connect(self.options.target).await?;

        let request = AuthorizationRequest {
            connection_key: self.options.connection_key.clone(),
            service_id: self.service_id().clone(),
        };
        let assigned = self
            .handshake
            .run(&channel, &request, self.options.handshake_timeout)
            .await?;

        *self.runtime_configuration.write() = assigned.clone();
        let mut event = ClusterEvent::ConfigurationUpdated(assigned);
        self.event_bus.call_event(&mut event);

        self.permissions.init().await?;

        let queries = Arc::clone(&self.queries);
        tokio::spawn(stratus_net::query::cleanup_task(queries, QUERY_SWEEP_INTERVAL));

        self.sync.publish_update(&channel);
        info!(service = %self.service_id(), "wrapper started");
        Ok(())
    }

    /// Close the authority channel.
    pub fn stop(&self) {
        self.client.close();
    }

    /// The identity this agent reports as.
    #[must_use]
    pub fn service_id(&self) -> &ServiceId {
        &self.options.service_configuration.service_id
    }

    /// The immutable configuration this service was provisioned with.
    #[must_use]
    pub fn service_configuration(&self) -> &ServiceConfiguration {
        &self.options.service_configuration
    }

    /// Runtime configuration assigned by the authority at authorization.
    #[must_use]
    pub fn runtime_configuration(&self) -> Document {
        self.runtime_configuration.read().clone()
    }

    /// The in-process event bus.
    #[must_use]
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// The driver-API client.
    #[must_use]
    pub fn api(&self) -> &Arc<DriverApiClient> {
        &self.api
    }

    /// The replicated permission store.
    #[must_use]
    pub fn permissions(&self) -> &Arc<CachedPermissionStore> {
        &self.permissions
    }

    /// The snapshot synchronizer.
    #[must_use]
    pub fn service_info(&self) -> &Arc<ServiceInfoSync> {
        &self.sync
    }

    /// The channel-message sender.
    #[must_use]
    pub fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    /// The network client (process-wide listener registry lives here).
    #[must_use]
    pub fn network_client(&self) -> &Arc<NetworkClient> {
        &self.client
    }

    /// The pending-query manager.
    #[must_use]
    pub fn queries(&self) -> &Arc<QueryManager> {
        &self.queries
    }

    /// The current channel to the authority, when connected.
    #[must_use]
    pub fn channel(&self) -> Option<Arc<NetworkChannel>> {
        self.client.channel()
    }

    /// Create, configure, and publish a fresh snapshot of this service.
    pub fn publish_service_info_update(&self) {
        if let Some(channel) = self.client.channel() {
            self.sync.publish_update(&channel);
        }
    }

    /// Detach every packet listener a collaborator module registered,
    /// on the process-wide registry and the live channel alike.
    pub fn remove_packet_listeners_by_owner(&self, owner: ListenerOwner) {
        self.client.registry().remove_listeners_by_owner(owner);
        if let Some(channel) = self.client.channel() {
            channel.registry().remove_listeners_by_owner(owner);
        }
    }

    /// Owner token of the wrapper's own core listeners.
    #[must_use]
    pub fn core_listener_owner(&self) -> ListenerOwner {
        self.core_owner
    }
}

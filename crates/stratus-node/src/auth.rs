//! Agent authorization and the node's channel gatekeeping.

use crate::NodeState;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use stratus_bus::ClusterEvent;
use stratus_net::{
    channels, AuthorizationRequest, AuthorizationResult, ChannelHandler, ListenerResult,
    NetworkChannel, Packet, PacketListener,
};
use stratus_types::{Document, ServiceConfiguration, ServiceId};
use tracing::{debug, info, warn};

/// One authorized agent connection.
pub struct AgentEntry {
    /// Identity the agent authenticated as.
    pub service_id: ServiceId,
    /// The provisioned configuration backing that identity.
    pub configuration: ServiceConfiguration,
    /// The live channel.
    pub channel: Arc<NetworkChannel>,
}

/// Authorized channels, keyed by channel id.
///
/// Enforces the one-live-channel-per-agent invariant: authorizing an
/// instance that already has a channel replaces (and closes) the old
/// one, the two never coexist.
#[derive(Default)]
pub struct AgentTable {
    by_channel: DashMap<u64, Arc<AgentEntry>>,
}

impl AgentTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `entry` as authorized. Returns the replaced channel when
    /// the same service instance was already connected.
    pub fn authorize(&self, entry: AgentEntry) -> Option<Arc<NetworkChannel>> {
        let instance_id = entry.service_id.instance_id;
        let stale = self
            .by_channel
            .iter()
            .find(|existing| existing.value().service_id.instance_id == instance_id)
            .map(|existing| *existing.key());

        let replaced = stale.and_then(|channel_id| {
            self.by_channel.remove(&channel_id).map(|(_, old)| Arc::clone(&old.channel))
        });

        self.by_channel.insert(entry.channel.id(), Arc::new(entry));
        replaced
    }

    /// Forget the agent bound to `channel_id`, returning its entry.
    pub fn remove_by_channel(&self, channel_id: u64) -> Option<Arc<AgentEntry>> {
        self.by_channel.remove(&channel_id).map(|(_, entry)| entry)
    }

    /// Whether `channel_id` passed authorization.
    #[must_use]
    pub fn is_authorized(&self, channel_id: u64) -> bool {
        self.by_channel.contains_key(&channel_id)
    }

    /// The entry bound to `channel_id`.
    #[must_use]
    pub fn entry_for_channel(&self, channel_id: u64) -> Option<Arc<AgentEntry>> {
        self.by_channel.get(&channel_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Every authorized agent.
    #[must_use]
    pub fn entries(&self) -> Vec<Arc<AgentEntry>> {
        self.by_channel.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// The agent running the service named `name`.
    #[must_use]
    pub fn find_by_service_name(&self, name: &str) -> Option<Arc<AgentEntry>> {
        self.by_channel
            .iter()
            .find(|entry| entry.value().service_id.name == name)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Agents whose service belongs to `group` (task group or
    /// configured group membership).
    #[must_use]
    pub fn find_by_group(&self, group: &str) -> Vec<Arc<AgentEntry>> {
        self.by_channel
            .iter()
            .filter(|entry| {
                let value = entry.value();
                value.service_id.task_name == group
                    || value.configuration.groups.iter().any(|g| g == group)
            })
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Send `packet` to every authorized agent, optionally excluding
    /// one channel (typically the packet's origin).
    pub fn broadcast(&self, packet: &Packet, except_channel: Option<u64>) {
        for entry in self.by_channel.iter() {
            if Some(*entry.key()) == except_channel {
                continue;
            }
            entry.value().channel.send(packet.clone());
        }
    }

    /// Number of authorized agents.
    #[must_use]
    pub fn count(&self) -> usize {
        self.by_channel.len()
    }
}

/// Channel lifecycle hook for the node: gates packets from channels
/// that have not passed authorization and cleans up on disconnect.
pub struct NodeChannelHandler {
    state: Arc<NodeState>,
}

impl NodeChannelHandler {
    /// Create the handler.
    #[must_use]
    pub fn new(state: Arc<NodeState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ChannelHandler for NodeChannelHandler {
    async fn handle_packet_receive(&self, channel: &Arc<NetworkChannel>, packet: &Packet) -> bool {
        if packet.channel_id() == channels::AUTHORIZATION
            || self.state.agents.is_authorized(channel.id())
        {
            return true;
        }
        debug!(
            peer = %channel.peer_addr(),
            channel_id = packet.channel_id(),
            "dropping packet from unauthorized channel"
        );
        false
    }

    async fn handle_channel_close(&self, channel: &Arc<NetworkChannel>) {
        let Some(entry) = self.state.agents.remove_by_channel(channel.id()) else {
            return;
        };
        info!(service = %entry.service_id, "agent disconnected");

        if let Some(snapshot) = self.state.registry.snapshot(&entry.service_id.instance_id) {
            let mut event = ClusterEvent::ServiceDisconnected(snapshot);
            self.state.event_bus.call_event(&mut event);
        }
    }
}

/// Listener on the authorization channel: validates credentials and
/// admits or denies the connection with a single reply packet.
pub struct AuthorizationListener {
    state: Arc<NodeState>,
}

impl AuthorizationListener {
    /// Create the listener.
    #[must_use]
    pub fn new(state: Arc<NodeState>) -> Self {
        Self { state }
    }

    fn deny(&self, channel: &Arc<NetworkChannel>, reason: &str) -> ListenerResult {
        warn!(peer = %channel.peer_addr(), reason, "authorization denied");
        let result = AuthorizationResult {
            accepted: false,
            reason: Some(reason.to_string()),
            runtime_configuration: None,
        };
        channel.send(Packet::typed(channels::AUTHORIZATION, Document::new(), &result)?);
        Ok(())
    }
}

#[async_trait]
impl PacketListener for AuthorizationListener {
    async fn handle(&self, channel: &Arc<NetworkChannel>, packet: &Packet) -> ListenerResult {
        let request: AuthorizationRequest = packet.decode_body()?;

        if request.connection_key != self.state.config.connection_key {
            return self.deny(channel, "invalid connection key");
        }

        let instance_id = request.service_id.instance_id;
        let Some(configuration) = self
            .state
            .provisioned
            .get(&instance_id)
            .map(|entry| entry.value().clone())
        else {
            return self.deny(channel, "service is not provisioned on this node");
        };

        if configuration.service_id != request.service_id {
            return self.deny(channel, "service identity mismatch");
        }

        let replaced = self.state.agents.authorize(AgentEntry {
            service_id: request.service_id.clone(),
            configuration: configuration.clone(),
            channel: Arc::clone(channel),
        });
        if let Some(stale) = replaced {
            info!(service = %request.service_id, "replacing stale agent channel");
            stale.close();
        }

        let runtime_configuration = Document::new()
            .append("node", self.state.config.name.clone())
            .append("service", request.service_id.name.clone())
            .append_object("service_configuration", &configuration);
        let result = AuthorizationResult {
            accepted: true,
            reason: None,
            runtime_configuration: Some(runtime_configuration),
        };
        channel.send(Packet::typed(channels::AUTHORIZATION, Document::new(), &result)?);
        info!(service = %request.service_id, peer = %channel.peer_addr(), "agent authorized");

        // Seed the registry so the service is visible before its first
        // own publish; a regression outcome here just means the entry
        // already advanced past Prepared.
        let seeded = crate::initial_snapshot(&configuration, channel.connected_at_millis());
        let _ = self.state.registry.apply_update(seeded.clone());

        let mut event = ClusterEvent::ServiceConnected(
            self.state
                .registry
                .snapshot(&instance_id)
                .unwrap_or(seeded),
        );
        self.state.event_bus.call_event(&mut event);
        Ok(())
    }
}

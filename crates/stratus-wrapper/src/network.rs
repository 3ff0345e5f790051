//! Steady-state packet listeners and the wrapper's channel handler.

use crate::permissions::CachedPermissionStore;
use async_trait::async_trait;
use std::sync::Arc;
use stratus_bus::{ClusterEvent, EventBus};
use stratus_net::{ChannelHandler, ListenerResult, NetworkChannel, Packet, PacketListener};
use stratus_telemetry::LogLevelHandle;
use stratus_types::{ChannelMessage, PermissionUpdate, ServiceInfoSnapshot};
use tracing::{debug, info};

/// Bridges channel lifecycle into the in-process event bus.
pub struct WrapperChannelHandler {
    event_bus: Arc<EventBus>,
}

impl WrapperChannelHandler {
    /// Create a handler publishing to `event_bus`.
    #[must_use]
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self { event_bus }
    }
}

#[async_trait]
impl ChannelHandler for WrapperChannelHandler {
    async fn handle_channel_initialize(&self, channel: &Arc<NetworkChannel>) {
        let mut event = ClusterEvent::ChannelConnected { peer: channel.peer_addr() };
        self.event_bus.call_event(&mut event);
    }

    async fn handle_channel_close(&self, channel: &Arc<NetworkChannel>) {
        info!(peer = %channel.peer_addr(), "authority channel closed");
        let mut event = ClusterEvent::ChannelClosed { peer: channel.peer_addr() };
        self.event_bus.call_event(&mut event);
    }
}

/// Snapshot fan-out from the authority → `ServiceInfoUpdated` event.
pub struct ServiceInfoUpdateListener {
    event_bus: Arc<EventBus>,
}

impl ServiceInfoUpdateListener {
    /// Create the listener.
    #[must_use]
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self { event_bus }
    }
}

#[async_trait]
impl PacketListener for ServiceInfoUpdateListener {
    async fn handle(&self, _channel: &Arc<NetworkChannel>, packet: &Packet) -> ListenerResult {
        let snapshot: ServiceInfoSnapshot = packet.decode_body()?;
        debug!(service = %snapshot.service_id(), "received service info update");
        let mut event = ClusterEvent::ServiceInfoUpdated(snapshot);
        self.event_bus.call_event(&mut event);
        Ok(())
    }
}

/// Permission pushes from the authority → cache + handler hooks.
pub struct PermissionPushListener {
    store: Arc<CachedPermissionStore>,
}

impl PermissionPushListener {
    /// Create the listener.
    #[must_use]
    pub fn new(store: Arc<CachedPermissionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PacketListener for PermissionPushListener {
    async fn handle(&self, _channel: &Arc<NetworkChannel>, packet: &Packet) -> ListenerResult {
        let update: PermissionUpdate = packet.decode_body()?;
        self.store.apply_update(update);
        Ok(())
    }
}

/// Channel messages relayed by the authority → `ChannelMessageReceived`.
pub struct ChannelMessageListener {
    event_bus: Arc<EventBus>,
}

impl ChannelMessageListener {
    /// Create the listener.
    #[must_use]
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self { event_bus }
    }
}

#[async_trait]
impl PacketListener for ChannelMessageListener {
    async fn handle(&self, _channel: &Arc<NetworkChannel>, packet: &Packet) -> ListenerResult {
        let message: ChannelMessage = packet.decode_body()?;
        debug!(channel = %message.channel, message = %message.message, "received channel message");
        let mut event = ClusterEvent::ChannelMessageReceived(message);
        self.event_bus.call_event(&mut event);
        Ok(())
    }
}

/// Cluster-wide log level pushes → the telemetry reload handle.
pub struct GlobalLogLevelListener {
    handle: Option<LogLevelHandle>,
}

impl GlobalLogLevelListener {
    /// Create the listener; without a handle, pushes are ignored.
    #[must_use]
    pub fn new(handle: Option<LogLevelHandle>) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl PacketListener for GlobalLogLevelListener {
    async fn handle(&self, _channel: &Arc<NetworkChannel>, packet: &Packet) -> ListenerResult {
        let level: String = packet.decode_body()?;
        info!(level = %level, "applying global log level");
        if let Some(handle) = &self.handle {
            handle.set_filter(&level)?;
        }
        Ok(())
    }
}

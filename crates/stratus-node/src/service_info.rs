//! Inbound snapshot publishes and their cluster-wide fan-out.

use crate::registry::UpdateOutcome;
use crate::NodeState;
use async_trait::async_trait;
use std::sync::Arc;
use stratus_bus::ClusterEvent;
use stratus_net::{ListenerResult, NetworkChannel, Packet, PacketListener};
use stratus_types::{ServiceInfoSnapshot, ServiceLifecycle};
use tracing::debug;

/// Listener on the service-info channel.
///
/// An accepted snapshot replaces the registry entry and is fanned out
/// to every *other* authorized channel; the publisher already holds it.
/// A rejected snapshot (lifecycle regression) is dropped without
/// fan-out, so subscribers never observe a service moving backwards.
pub struct ServiceInfoPublishListener {
    state: Arc<NodeState>,
}

impl ServiceInfoPublishListener {
    /// Create the listener.
    #[must_use]
    pub fn new(state: Arc<NodeState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl PacketListener for ServiceInfoPublishListener {
    async fn handle(&self, channel: &Arc<NetworkChannel>, packet: &Packet) -> ListenerResult {
        let snapshot: ServiceInfoSnapshot = packet.decode_body()?;
        debug!(
            service = %snapshot.service_id(),
            lifecycle = %snapshot.lifecycle,
            "received service info publish"
        );

        let UpdateOutcome::Accepted { previous } =
            self.state.registry.apply_update(snapshot.clone())
        else {
            return Ok(());
        };

        self.state.agents.broadcast(packet, Some(channel.id()));

        // Lifecycle edges get their own events alongside the plain
        // info-update.
        match (previous, snapshot.lifecycle) {
            (Some(prev), ServiceLifecycle::Running) if prev != ServiceLifecycle::Running => {
                let mut event = ClusterEvent::ServiceStarted(snapshot.clone());
                self.state.event_bus.call_event(&mut event);
            }
            (Some(prev), ServiceLifecycle::Stopped) if prev != ServiceLifecycle::Stopped => {
                let mut event = ClusterEvent::ServiceStopped(snapshot.clone());
                self.state.event_bus.call_event(&mut event);
            }
            _ => {}
        }

        let mut event = ClusterEvent::ServiceInfoUpdated(snapshot);
        self.state.event_bus.call_event(&mut event);
        Ok(())
    }
}

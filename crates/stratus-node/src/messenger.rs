//! Channel-message relay.
//!
//! The node is a router for channel messages: it inspects the target
//! selector, forwards the packet verbatim to each terminal recipient,
//! and dispatches to its own local bus only when it is itself a
//! terminal recipient (broadcast, or addressed to this node by name).
//! Delivery is best-effort and at-most-once per currently connected
//! recipient.

use crate::NodeState;
use async_trait::async_trait;
use std::sync::Arc;
use stratus_bus::ClusterEvent;
use stratus_net::{ListenerResult, NetworkChannel, Packet, PacketListener};
use stratus_types::{ChannelMessage, MessageTarget};
use tracing::debug;

/// Listener on the channel-messaging channel.
pub struct ChannelMessageRelayListener {
    state: Arc<NodeState>,
}

impl ChannelMessageRelayListener {
    /// Create the relay.
    #[must_use]
    pub fn new(state: Arc<NodeState>) -> Self {
        Self { state }
    }

    fn dispatch_locally(&self, message: ChannelMessage) {
        let mut event = ClusterEvent::ChannelMessageReceived(message);
        self.state.event_bus.call_event(&mut event);
    }
}

#[async_trait]
impl PacketListener for ChannelMessageRelayListener {
    async fn handle(&self, channel: &Arc<NetworkChannel>, packet: &Packet) -> ListenerResult {
        let message: ChannelMessage = packet.decode_body()?;
        debug!(
            channel = %message.channel,
            message = %message.message,
            target = ?message.target,
            "relaying channel message"
        );

        match message.target.clone() {
            MessageTarget::All => {
                self.state.agents.broadcast(packet, Some(channel.id()));
                self.dispatch_locally(message);
            }
            MessageTarget::Node(name) => {
                if name == self.state.config.name {
                    self.dispatch_locally(message);
                } else {
                    // Single-authority deployment: a foreign node name
                    // has no route, and best-effort means drop.
                    debug!(node = %name, "no route to target node, dropping message");
                }
            }
            MessageTarget::Service(name) => {
                // The sender counts as a recipient when it addresses
                // itself: the packet is looped straight back.
                match self.state.agents.find_by_service_name(&name) {
                    Some(entry) => entry.channel.send(packet.clone()),
                    None => {
                        debug!(service = %name, "target service not connected, dropping message");
                    }
                }
            }
            MessageTarget::TaskGroup(group) => {
                for entry in self.state.agents.find_by_group(&group) {
                    entry.channel.send(packet.clone());
                }
            }
        }

        Ok(())
    }
}

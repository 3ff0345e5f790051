//! Outbound channel messages.

use std::sync::Arc;
use stratus_net::{channels, NetworkClient, Packet};
use stratus_types::{ChannelMessage, Document};
use tracing::{debug, warn};

/// Sends channel messages toward the authority for relaying.
///
/// Delivery is best-effort: a message sent while disconnected is
/// dropped, matching the at-most-once contract.
pub struct Messenger {
    client: Arc<NetworkClient>,
}

impl Messenger {
    /// Create a messenger sending through `client`'s channel.
    #[must_use]
    pub fn new(client: Arc<NetworkClient>) -> Self {
        Self { client }
    }

    /// Hand `message` to the authority for relaying to its target.
    pub fn send(&self, message: &ChannelMessage) {
        let Some(channel) = self.client.channel() else {
            debug!(channel = %message.channel, "dropping channel message while disconnected");
            return;
        };

        match Packet::typed(channels::CHANNEL_MESSAGING, Document::new(), message) {
            Ok(packet) => channel.send(packet),
            Err(error) => warn!(error = %error, "failed to encode channel message"),
        }
    }
}

//! Packet listener registration and dispatch.
//!
//! Listeners are tagged with a [`ListenerOwner`] so a feature module can
//! detach everything it registered in one call when it unloads, without
//! touching other owners' listeners.

use crate::channel::NetworkChannel;
use crate::packet::Packet;
use async_trait::async_trait;
use dashmap::DashMap;
use std::error::Error;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Result type for listener invocations.
///
/// A listener error is isolated and logged; it never stops delivery to
/// the remaining listeners for the same packet.
pub type ListenerResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Opaque token identifying who registered a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerOwner(Uuid);

impl ListenerOwner {
    /// Mint a fresh owner token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerOwner {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler for inbound packets on a channel id.
///
/// Dispatch runs on the connection's delivery task to preserve
/// per-channel ordering; a listener that needs to block must hand the
/// packet off to its own task.
#[async_trait]
pub trait PacketListener: Send + Sync {
    /// Handle one inbound packet.
    async fn handle(&self, channel: &Arc<NetworkChannel>, packet: &Packet) -> ListenerResult;
}

struct RegisteredListener {
    owner: ListenerOwner,
    listener: Arc<dyn PacketListener>,
}

/// A table of packet listeners keyed by channel id.
///
/// Two scopes exist at runtime: one process-wide registry shared by all
/// connections, and one connection-scoped registry per channel (used
/// e.g. for the one-shot authorization listener). The structure is the
/// same; the channel consults its own registry first.
#[derive(Default)]
pub struct PacketListenerRegistry {
    listeners: DashMap<u16, Vec<RegisteredListener>>,
}

impl PacketListenerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener for `channel_id`, tagged with `owner`.
    ///
    /// Listeners run in registration order for every matching packet.
    pub fn add_listener(
        &self,
        channel_id: u16,
        owner: ListenerOwner,
        listener: Arc<dyn PacketListener>,
    ) {
        self.listeners
            .entry(channel_id)
            .or_default()
            .push(RegisteredListener { owner, listener });
    }

    /// Remove every listener registered for `channel_id`.
    pub fn remove_listeners(&self, channel_id: u16) {
        self.listeners.remove(&channel_id);
    }

    /// Remove all and only the listeners registered by `owner`, across
    /// every channel id.
    pub fn remove_listeners_by_owner(&self, owner: ListenerOwner) {
        self.listeners.retain(|_, entries| {
            entries.retain(|entry| entry.owner != owner);
            !entries.is_empty()
        });
    }

    /// Whether any listener is registered for `channel_id`.
    #[must_use]
    pub fn has_listeners(&self, channel_id: u16) -> bool {
        self.listeners
            .get(&channel_id)
            .map(|entries| !entries.is_empty())
            .unwrap_or(false)
    }

    /// Total number of registered listeners, across all channel ids.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.iter().map(|entry| entry.value().len()).sum()
    }

    /// Deliver `packet` to every listener for its channel id, in
    /// registration order. Returns how many listeners were invoked.
    ///
    /// The listener list is snapshotted before dispatch, so a listener
    /// that unregisters itself (or others) mid-delivery takes effect
    /// from the next packet on.
    pub async fn dispatch(&self, channel: &Arc<NetworkChannel>, packet: &Packet) -> usize {
        let snapshot: Vec<Arc<dyn PacketListener>> = match self.listeners.get(&packet.channel_id())
        {
            Some(entries) => entries.iter().map(|e| Arc::clone(&e.listener)).collect(),
            None => return 0,
        };

        for listener in &snapshot {
            if let Err(error) = listener.handle(channel, packet).await {
                warn!(
                    channel_id = packet.channel_id(),
                    error = %error,
                    "packet listener failed; continuing with remaining listeners"
                );
            }
        }

        snapshot.len()
    }
}

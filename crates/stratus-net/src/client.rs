//! TCP client side of the transport.

use crate::channel::{ChannelHandler, NetworkChannel};
use crate::registry::PacketListenerRegistry;
use crate::NetworkError;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::info;

/// Connects to the authority and owns the single resulting channel.
///
/// There is no built-in reconnect: when the channel dies the owning
/// runtime decides whether and when to build a new client.
pub struct NetworkClient {
    registry: Arc<PacketListenerRegistry>,
    handler: Arc<dyn ChannelHandler>,
    channel: RwLock<Option<Arc<NetworkChannel>>>,
}

impl NetworkClient {
    /// Create a client whose channels share `handler` for lifecycle
    /// callbacks. The process-wide listener registry is created here.
    #[must_use]
    pub fn new(handler: Arc<dyn ChannelHandler>) -> Self {
        Self {
            registry: Arc::new(PacketListenerRegistry::new()),
            handler,
            channel: RwLock::new(None),
        }
    }

    /// The process-wide listener registry shared by this client's channel.
    #[must_use]
    pub fn registry(&self) -> &Arc<PacketListenerRegistry> {
        &self.registry
    }

    /// Connect to `addr` and spawn the channel tasks.
    ///
    /// A previous channel, if any, is replaced and closed — one live
    /// channel per logical link, never two.
    pub async fn connect(&self, addr: SocketAddr) -> Result<Arc<NetworkChannel>, NetworkError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;

        let channel = NetworkChannel::spawn(
            stream,
            peer_addr,
            local_addr,
            Arc::clone(&self.registry),
            Arc::clone(&self.handler),
        )
        .await;

        info!(peer = %peer_addr, channel = channel.id(), "connected to authority");

        let previous = self.channel.write().replace(Arc::clone(&channel));
        if let Some(previous) = previous {
            previous.close();
        }

        Ok(channel)
    }

    /// The current channel, when connected.
    #[must_use]
    pub fn channel(&self) -> Option<Arc<NetworkChannel>> {
        self.channel.read().clone()
    }

    /// Close the current channel, if any.
    pub fn close(&self) {
        if let Some(channel) = self.channel.write().take() {
            channel.close();
        }
    }
}

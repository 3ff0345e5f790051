//! TCP server side of the transport.

use crate::channel::{ChannelHandler, NetworkChannel};
use crate::packet::Packet;
use crate::registry::PacketListenerRegistry;
use crate::NetworkError;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

/// Accepts agent connections and tracks the live channels.
///
/// Every accepted connection shares the server's process-wide listener
/// registry and the caller-supplied [`ChannelHandler`]; the server
/// additionally keeps a channel table so the node can broadcast.
pub struct NetworkServer {
    registry: Arc<PacketListenerRegistry>,
    channels: Arc<DashMap<u64, Arc<NetworkChannel>>>,
    handler: Arc<dyn ChannelHandler>,
    local_addr: RwLock<Option<SocketAddr>>,
    shutdown_tx: watch::Sender<bool>,
}

impl NetworkServer {
    /// Create a server delegating channel lifecycle events to `handler`.
    #[must_use]
    pub fn new(handler: Arc<dyn ChannelHandler>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            registry: Arc::new(PacketListenerRegistry::new()),
            channels: Arc::new(DashMap::new()),
            handler,
            local_addr: RwLock::new(None),
            shutdown_tx,
        }
    }

    /// The process-wide listener registry shared by all accepted channels.
    #[must_use]
    pub fn registry(&self) -> &Arc<PacketListenerRegistry> {
        &self.registry
    }

    /// Bind `addr` and spawn the accept loop. Returns the bound address
    /// (useful with port `0`).
    pub async fn bind(&self, addr: SocketAddr) -> Result<SocketAddr, NetworkError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.write() = Some(local_addr);
        info!(addr = %local_addr, "listening for agent connections");

        let registry = Arc::clone(&self.registry);
        let channels = Arc::clone(&self.channels);
        let handler = Arc::clone(&self.handler);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let (stream, peer_addr) = match accepted {
                            Ok(pair) => pair,
                            Err(error) => {
                                warn!(error = %error, "accept failed");
                                continue;
                            }
                        };
                        if let Err(error) = stream.set_nodelay(true) {
                            warn!(peer = %peer_addr, error = %error, "set_nodelay failed");
                        }

                        let tracked = Arc::new(TrackingHandler {
                            channels: Arc::clone(&channels),
                            inner: Arc::clone(&handler),
                        });
                        let channel = NetworkChannel::spawn(
                            stream,
                            peer_addr,
                            local_addr,
                            Arc::clone(&registry),
                            tracked,
                        )
                        .await;
                        info!(peer = %peer_addr, channel = channel.id(), "agent connected");
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        Ok(local_addr)
    }

    /// Address the server is bound to, once [`bind`](Self::bind) ran.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    /// Snapshot of the currently connected channels.
    #[must_use]
    pub fn channels(&self) -> Vec<Arc<NetworkChannel>> {
        self.channels.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Number of currently connected channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Send `packet` to every connected channel.
    pub fn broadcast(&self, packet: &Packet) {
        for entry in self.channels.iter() {
            entry.value().send(packet.clone());
        }
    }

    /// Stop accepting and close every connected channel.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        for entry in self.channels.iter() {
            entry.value().close();
        }
        self.channels.clear();
    }
}

/// Wraps the caller's handler to keep the server's channel table current.
struct TrackingHandler {
    channels: Arc<DashMap<u64, Arc<NetworkChannel>>>,
    inner: Arc<dyn ChannelHandler>,
}

#[async_trait]
impl ChannelHandler for TrackingHandler {
    async fn handle_channel_initialize(&self, channel: &Arc<NetworkChannel>) {
        self.channels.insert(channel.id(), Arc::clone(channel));
        self.inner.handle_channel_initialize(channel).await;
    }

    async fn handle_packet_receive(&self, channel: &Arc<NetworkChannel>, packet: &Packet) -> bool {
        self.inner.handle_packet_receive(channel, packet).await
    }

    async fn handle_channel_close(&self, channel: &Arc<NetworkChannel>) {
        self.channels.remove(&channel.id());
        self.inner.handle_channel_close(channel).await;
    }
}

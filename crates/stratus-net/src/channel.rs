//! The live connection handle and its reader/writer tasks.

use crate::codec::{self, CodecError};
use crate::packet::Packet;
use crate::registry::PacketListenerRegistry;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

static CHANNEL_ID_SEQ: AtomicU64 = AtomicU64::new(1);

/// Observer of a channel's lifecycle, owned by the node/wrapper runtime.
///
/// All hooks run on the channel's own tasks; long work must be handed
/// off.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    /// Called once when the channel's tasks are up.
    async fn handle_channel_initialize(&self, _channel: &Arc<NetworkChannel>) {}

    /// Called for every decoded inbound packet before dispatch.
    /// Returning `false` drops the packet without dispatching it.
    async fn handle_packet_receive(&self, _channel: &Arc<NetworkChannel>, _packet: &Packet) -> bool {
        true
    }

    /// Called exactly once when the channel closes, whether by `close()`
    /// or by transport failure. This is the disconnect notification.
    async fn handle_channel_close(&self, _channel: &Arc<NetworkChannel>) {}
}

/// A [`ChannelHandler`] that observes nothing.
pub struct NoopChannelHandler;

#[async_trait]
impl ChannelHandler for NoopChannelHandler {}

/// A live, ordered, framed byte-stream connection to one peer.
///
/// Exactly one of these exists per logical agent↔authority link; a
/// reconnect builds a new channel, it never revives an old one. Owns a
/// connection-scoped listener registry and shares the process-wide one.
pub struct NetworkChannel {
    id: u64,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    connected_at_millis: u64,
    outbound: mpsc::UnboundedSender<Packet>,
    shutdown_tx: watch::Sender<bool>,
    registry: PacketListenerRegistry,
    shared_registry: Arc<PacketListenerRegistry>,
    closed: AtomicBool,
}

impl NetworkChannel {
    /// Spawn reader/writer tasks over `io` and return the channel handle.
    ///
    /// `shared_registry` is the process-wide listener table; the channel
    /// additionally owns a connection-scoped table consulted first.
    pub async fn spawn<S>(
        io: S,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
        shared_registry: Arc<PacketListenerRegistry>,
        handler: Arc<dyn ChannelHandler>,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let channel = Arc::new(Self {
            id: CHANNEL_ID_SEQ.fetch_add(1, Ordering::Relaxed),
            peer_addr,
            local_addr,
            connected_at_millis: now_millis(),
            outbound,
            shutdown_tx,
            registry: PacketListenerRegistry::new(),
            shared_registry,
            closed: AtomicBool::new(false),
        });

        handler.handle_channel_initialize(&channel).await;

        tokio::spawn(writer_task(
            outbound_rx,
            write_half,
            shutdown_rx.clone(),
            Arc::clone(&channel),
            Arc::clone(&handler),
        ));
        tokio::spawn(reader_task(read_half, shutdown_rx, Arc::clone(&channel), handler));

        channel
    }

    /// Unique id of this channel within the process.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Address of the remote peer.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Local address of the connection.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Unix millis at which the connection was established.
    #[must_use]
    pub fn connected_at_millis(&self) -> u64 {
        self.connected_at_millis
    }

    /// The connection-scoped listener registry.
    #[must_use]
    pub fn registry(&self) -> &PacketListenerRegistry {
        &self.registry
    }

    /// The process-wide listener registry this channel shares.
    #[must_use]
    pub fn shared_registry(&self) -> &Arc<PacketListenerRegistry> {
        &self.shared_registry
    }

    /// Enqueue a packet for transmission.
    ///
    /// Never reports per-call failure: a packet enqueued on a channel
    /// that is closing is silently dropped, and a transport failure
    /// surfaces as the disconnect notification instead.
    pub fn send(&self, packet: Packet) {
        if self.outbound.send(packet).is_err() {
            trace!(channel = self.id, "dropping packet enqueued on closed channel");
        }
    }

    /// Whether the channel has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the channel. Idempotent; the disconnect notification fires
    /// once, asynchronously, on the channel's own tasks.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Mark closed and run the disconnect notification exactly once.
    async fn finish_close(self: &Arc<Self>, handler: &Arc<dyn ChannelHandler>) {
        let _ = self.shutdown_tx.send(true);
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(channel = self.id, peer = %self.peer_addr, "channel closed");
            handler.handle_channel_close(self).await;
        }
    }

    /// Deliver one inbound packet: handler veto, then connection-scoped
    /// listeners, then process-wide listeners, all in registration order.
    async fn deliver(self: &Arc<Self>, handler: &Arc<dyn ChannelHandler>, packet: Packet) {
        if !handler.handle_packet_receive(self, &packet).await {
            return;
        }

        let mut invoked = self.registry.dispatch(self, &packet).await;
        invoked += self.shared_registry.dispatch(self, &packet).await;

        if invoked == 0 {
            debug!(
                channel = self.id,
                channel_id = packet.channel_id(),
                "dropping packet for unknown channel id"
            );
        }
    }

    /// Build a channel over an in-memory duplex pipe for unit tests.
    #[cfg(test)]
    pub(crate) async fn stub_for_tests() -> (Arc<Self>, tokio::io::DuplexStream) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let addr: SocketAddr = "127.0.0.1:0".parse().expect("literal addr");
        let channel = Self::spawn(
            ours,
            addr,
            addr,
            Arc::new(PacketListenerRegistry::new()),
            Arc::new(NoopChannelHandler),
        )
        .await;
        (channel, theirs)
    }
}

async fn writer_task<S>(
    mut outbound: mpsc::UnboundedReceiver<Packet>,
    mut write_half: WriteHalf<S>,
    mut shutdown: watch::Receiver<bool>,
    channel: Arc<NetworkChannel>,
    handler: Arc<dyn ChannelHandler>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    loop {
        tokio::select! {
            maybe_packet = outbound.recv() => {
                let Some(packet) = maybe_packet else { break };
                let frame = codec::encode_frame(packet);
                if let Err(error) = write_half.write_all(&frame).await {
                    warn!(channel = channel.id, error = %error, "transport write failed");
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    let _ = write_half.shutdown().await;
    channel.finish_close(&handler).await;
}

async fn reader_task<S>(
    mut read_half: ReadHalf<S>,
    mut shutdown: watch::Receiver<bool>,
    channel: Arc<NetworkChannel>,
    handler: Arc<dyn ChannelHandler>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    loop {
        tokio::select! {
            result = read_frame(&mut read_half) => {
                match result {
                    Ok(packet) => channel.deliver(&handler, packet).await,
                    Err(ReadError::Eof) => {
                        debug!(channel = channel.id, "peer closed the connection");
                        break;
                    }
                    Err(ReadError::Io(error)) => {
                        warn!(channel = channel.id, error = %error, "transport read failed");
                        break;
                    }
                    Err(ReadError::Codec(error)) => {
                        warn!(channel = channel.id, error = %error, "malformed frame, closing channel");
                        break;
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    channel.finish_close(&handler).await;
}

enum ReadError {
    Eof,
    Io(std::io::Error),
    Codec(CodecError),
}

impl From<std::io::Error> for ReadError {
    fn from(error: std::io::Error) -> Self {
        if error.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::Eof
        } else {
            Self::Io(error)
        }
    }
}

async fn read_frame<S>(read_half: &mut ReadHalf<S>) -> Result<Packet, ReadError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut len_buf = [0u8; 4];
    read_half.read_exact(&mut len_buf).await?;
    let frame_len = u32::from_be_bytes(len_buf) as usize;
    codec::check_frame_len(frame_len).map_err(ReadError::Codec)?;

    let mut frame = vec![0u8; frame_len];
    read_half.read_exact(&mut frame).await?;

    codec::decode_frame(frame.into()).map_err(ReadError::Codec)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::channels;
    use crate::registry::{ListenerOwner, ListenerResult, PacketListener};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use stratus_types::Document;
    use tokio::sync::Notify;

    struct Recorder {
        hits: Arc<AtomicUsize>,
        notify: Arc<Notify>,
    }

    #[async_trait]
    impl PacketListener for Recorder {
        async fn handle(&self, _channel: &Arc<NetworkChannel>, _packet: &Packet) -> ListenerResult {
            self.hits.fetch_add(1, Ordering::SeqCst);
            self.notify.notify_one();
            Ok(())
        }
    }

    async fn connected_pair() -> (Arc<NetworkChannel>, Arc<NetworkChannel>) {
        let (left, right) = tokio::io::duplex(64 * 1024);
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let a = NetworkChannel::spawn(
            left,
            addr,
            addr,
            Arc::new(PacketListenerRegistry::new()),
            Arc::new(NoopChannelHandler),
        )
        .await;
        let b = NetworkChannel::spawn(
            right,
            addr,
            addr,
            Arc::new(PacketListenerRegistry::new()),
            Arc::new(NoopChannelHandler),
        )
        .await;
        (a, b)
    }

    #[tokio::test]
    async fn test_send_reaches_peer_listener() {
        let (a, b) = connected_pair().await;
        let hits = Arc::new(AtomicUsize::new(0));
        let notify = Arc::new(Notify::new());
        b.registry().add_listener(
            channels::DRIVER_API,
            ListenerOwner::new(),
            Arc::new(Recorder { hits: Arc::clone(&hits), notify: Arc::clone(&notify) }),
        );

        a.send(Packet::new(channels::DRIVER_API, Document::new(), vec![1u8, 2]));

        tokio::time::timeout(Duration::from_secs(1), notify.notified())
            .await
            .expect("packet delivered");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_channel_id_is_dropped_silently() {
        let (a, b) = connected_pair().await;
        let hits = Arc::new(AtomicUsize::new(0));
        let notify = Arc::new(Notify::new());
        b.registry().add_listener(
            channels::DRIVER_API,
            ListenerOwner::new(),
            Arc::new(Recorder { hits: Arc::clone(&hits), notify: Arc::clone(&notify) }),
        );

        // No listener for this id anywhere; the next packet must still arrive.
        a.send(Packet::new(4242, Document::new(), Vec::new()));
        a.send(Packet::new(channels::DRIVER_API, Document::new(), Vec::new()));

        tokio::time::timeout(Duration::from_secs(1), notify.notified())
            .await
            .expect("second packet delivered");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_marks_channel() {
        let (a, _b) = connected_pair().await;
        a.close();
        a.close();

        tokio::time::timeout(Duration::from_secs(1), async {
            while !a.is_closed() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("channel closes");
        assert!(a.is_closed());
    }

    #[tokio::test]
    async fn test_send_after_close_does_not_panic() {
        let (a, _b) = connected_pair().await;
        a.close();
        tokio::time::sleep(Duration::from_millis(20)).await;
        a.send(Packet::new(channels::DRIVER_API, Document::new(), Vec::new()));
    }
}

//! # Stratus Network Layer
//!
//! The agent↔authority packet plumbing: a length-prefixed binary frame
//! codec, per-connection and process-wide listener registries, a
//! correlation layer that turns the fire-and-forget packet channel into
//! awaitable request/response calls, and the one-time authorization
//! handshake that gates a fresh connection.
//!
//! ## Layering
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │ QueryManager        (request/response + timeout)│
//! ├────────────────────────────────────────────────┤
//! │ PacketListenerRegistry   (routing by channel id)│
//! ├────────────────────────────────────────────────┤
//! │ NetworkChannel      (reader/writer tasks, codec)│
//! ├────────────────────────────────────────────────┤
//! │ TCP                                             │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! Packets on one channel are delivered in send order; nothing is
//! guaranteed across independently opened channels or across queries
//! that complete out of order.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod channel;
pub mod client;
pub mod codec;
pub mod correlation;
pub mod handshake;
pub mod packet;
pub mod query;
pub mod registry;
pub mod server;

pub use channel::{ChannelHandler, NetworkChannel, NoopChannelHandler};
pub use client::NetworkClient;
pub use codec::CodecError;
pub use correlation::CorrelationId;
pub use handshake::{
    AuthorizationRequest, AuthorizationResult, Handshake, HandshakeError, HandshakeState,
    DEFAULT_HANDSHAKE_TIMEOUT,
};
pub use packet::{channels, Packet};
pub use query::{
    QueryError, QueryManager, QueryResponseListener, DEFAULT_QUERY_TIMEOUT,
};
pub use registry::{ListenerOwner, ListenerResult, PacketListener, PacketListenerRegistry};
pub use server::NetworkServer;

use thiserror::Error;

/// Errors surfaced by connection setup and teardown.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Underlying socket failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The channel is closed.
    #[error("channel closed")]
    Closed,
}

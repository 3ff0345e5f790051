//! One-time connection authorization.
//!
//! A fresh agent channel is useless until the authority has accepted
//! its credentials: the agent installs a one-shot connection-scoped
//! listener on the authorization channel, sends its request, and parks
//! the starting sequence on a completion future with a bounded timeout.
//! Denial and timeout are fatal to startup; reconnect policy belongs to
//! an external supervisor, never to this layer.

use crate::channel::NetworkChannel;
use crate::packet::{channels, Packet};
use crate::registry::{ListenerOwner, ListenerResult, PacketListener};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use stratus_types::{Document, ServiceId};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Default bound on the authorization wait.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Progress of one connection's authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Channel established, request not yet sent.
    Connecting,
    /// Request sent, waiting for the authority's verdict.
    AwaitingAuth,
    /// Accepted; steady-state listeners may be installed. Terminal.
    Authorized,
    /// Rejected by the authority. Terminal.
    Denied,
}

/// Credentials an agent presents to the authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    /// Shared secret provisioned alongside the service.
    pub connection_key: String,
    /// The identity the agent claims.
    pub service_id: ServiceId,
}

/// The authority's single reply to an [`AuthorizationRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationResult {
    /// Whether the connection is authorized.
    pub accepted: bool,
    /// Reason for a denial, when the authority cares to give one.
    pub reason: Option<String>,
    /// Runtime configuration assigned to the agent on acceptance.
    pub runtime_configuration: Option<Document>,
}

/// Why a handshake did not end in `Authorized`.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The authority rejected the credentials.
    #[error("authorization denied{}", reason_suffix(.0))]
    Denied(Option<String>),
    /// No verdict arrived within the bound.
    #[error("authorization timed out after {0:?}")]
    Timeout(Duration),
    /// The channel closed before a verdict arrived.
    #[error("channel closed during authorization")]
    ChannelClosed,
    /// The verdict packet body could not be decoded.
    #[error("malformed authorization response: {0}")]
    Decode(#[from] serde_json::Error),
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default()
}

/// The agent-side authorization state machine.
///
/// `Connecting → AwaitingAuth → Authorized | Denied`; both terminal
/// states stick. The blocking variant for synchronous callers is a thin
/// adapter over the same future, not a second implementation.
pub struct Handshake {
    state: Mutex<HandshakeState>,
}

impl Handshake {
    /// Create a handshake in the `Connecting` state.
    #[must_use]
    pub fn new() -> Self {
        Self { state: Mutex::new(HandshakeState::Connecting) }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> HandshakeState {
        *self.state.lock()
    }

    /// Run the handshake on `channel`: install the one-shot listener,
    /// send `request`, and await the verdict for at most `timeout`.
    ///
    /// On success the one-shot listener is already removed and the
    /// assigned runtime configuration is returned. On any failure the
    /// listener is removed as well; the caller must treat the failure
    /// as fatal to startup.
    pub async fn run(
        &self,
        channel: &Arc<NetworkChannel>,
        request: &AuthorizationRequest,
        timeout: Duration,
    ) -> Result<Document, HandshakeError> {
        let (sender, receiver) = oneshot::channel();
        let owner = ListenerOwner::new();
        channel.registry().add_listener(
            channels::AUTHORIZATION,
            owner,
            Arc::new(AuthResponseListener { sender: Mutex::new(Some(sender)) }),
        );

        let packet = Packet::typed(channels::AUTHORIZATION, Document::new(), request)?;
        channel.send(packet);
        *self.state.lock() = HandshakeState::AwaitingAuth;
        debug!(service = %request.service_id, "authorization request sent");

        let verdict = tokio::time::timeout(timeout, receiver).await;
        // One-shot: gone after the first verdict or any failure.
        channel.registry().remove_listeners_by_owner(owner);

        let result = match verdict {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => return Err(HandshakeError::ChannelClosed),
            Err(_) => return Err(HandshakeError::Timeout(timeout)),
        };

        if !result.accepted {
            *self.state.lock() = HandshakeState::Denied;
            return Err(HandshakeError::Denied(result.reason));
        }

        *self.state.lock() = HandshakeState::Authorized;
        info!(service = %request.service_id, "authorization accepted");
        Ok(result.runtime_configuration.unwrap_or_default())
    }

    /// Blocking adapter over [`Handshake::run`] for synchronous callers.
    ///
    /// Must be invoked from outside the async runtime; `handle` names
    /// the runtime that owns the channel's tasks.
    pub fn run_blocking(
        &self,
        handle: &tokio::runtime::Handle,
        channel: &Arc<NetworkChannel>,
        request: &AuthorizationRequest,
        timeout: Duration,
    ) -> Result<Document, HandshakeError> {
        handle.block_on(self.run(channel, request, timeout))
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

struct AuthResponseListener {
    sender: Mutex<Option<oneshot::Sender<AuthorizationResult>>>,
}

#[async_trait]
impl PacketListener for AuthResponseListener {
    async fn handle(&self, _channel: &Arc<NetworkChannel>, packet: &Packet) -> ListenerResult {
        let result: AuthorizationResult = packet.decode_body()?;
        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(result);
        }
        Ok(())
    }
}

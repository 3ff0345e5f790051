//! Wrapper startup options.
//!
//! The node writes these alongside the provisioned service; the
//! embedding process hands them to [`Wrapper::new`](crate::Wrapper::new)
//! already parsed. File formats and argument parsing stay outside the
//! core.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use stratus_types::ServiceConfiguration;

/// Everything the agent needs to reach and authenticate to its node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrapperOptions {
    /// Address of the authority's listener.
    pub target: SocketAddr,
    /// Shared secret provisioned with the service.
    pub connection_key: String,
    /// The service this agent embeds into.
    pub service_configuration: ServiceConfiguration,
    /// Bound on the authorization wait.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: Duration,
    /// Default deadline for driver-API queries.
    #[serde(default = "default_query_timeout")]
    pub query_timeout: Duration,
}

impl WrapperOptions {
    /// Build options with default timeouts.
    #[must_use]
    pub fn new(
        target: SocketAddr,
        connection_key: impl Into<String>,
        service_configuration: ServiceConfiguration,
    ) -> Self {
        Self {
            target,
            connection_key: connection_key.into(),
            service_configuration,
            handshake_timeout: default_handshake_timeout(),
            query_timeout: default_query_timeout(),
        }
    }
}

fn default_handshake_timeout() -> Duration {
    stratus_net::DEFAULT_HANDSHAKE_TIMEOUT
}

fn default_query_timeout() -> Duration {
    stratus_net::DEFAULT_QUERY_TIMEOUT
}

//! Node configuration.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::warn;

/// Settings for one authority instance.
///
/// The embedding process builds this (or takes the env overrides);
/// configuration files stay outside the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Name this node announces to its agents.
    pub name: String,
    /// Address the agent listener binds.
    pub bind_addr: SocketAddr,
    /// Shared secret agents must present during authorization.
    pub connection_key: String,
}

impl NodeConfig {
    /// Build from environment variables, falling back to defaults.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `STRATUS_NODE_NAME` | `Node-1` |
    /// | `STRATUS_BIND_ADDR` | `127.0.0.1:1410` |
    /// | `STRATUS_CONNECTION_KEY` | random |
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind_addr = match std::env::var("STRATUS_BIND_ADDR") {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(raw = %raw, "invalid STRATUS_BIND_ADDR, using default");
                defaults.bind_addr
            }),
            Err(_) => defaults.bind_addr,
        };

        Self {
            name: std::env::var("STRATUS_NODE_NAME").unwrap_or(defaults.name),
            bind_addr,
            connection_key: std::env::var("STRATUS_CONNECTION_KEY")
                .unwrap_or(defaults.connection_key),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "Node-1".to_string(),
            bind_addr: "127.0.0.1:1410".parse().expect("literal addr"),
            connection_key: uuid::Uuid::new_v4().to_string(),
        }
    }
}

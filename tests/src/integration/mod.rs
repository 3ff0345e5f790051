//! Cross-crate integration flows.

pub mod handshake_flows;
pub mod messaging_flows;
pub mod permission_flows;
pub mod query_flows;
pub mod snapshot_flows;

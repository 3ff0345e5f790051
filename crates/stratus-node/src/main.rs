//! Authority binary: env-driven configuration, telemetry, run until
//! interrupted.

use anyhow::{Context, Result};
use stratus_node::{Node, NodeConfig};
use stratus_telemetry::{init_telemetry, TelemetryConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = init_telemetry(
        TelemetryConfig::from_env().with_service_name("stratus-node"),
    )
    .context("failed to initialize telemetry")?;

    let config = NodeConfig::from_env();
    let node = Node::new(config, Some(telemetry.log_level_handle()));

    let addr = node.start().await.context("failed to start node")?;
    info!(addr = %addr, "node is running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await.context("failed to wait for shutdown signal")?;

    node.shutdown();
    Ok(())
}

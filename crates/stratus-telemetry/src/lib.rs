//! # Stratus Telemetry
//!
//! Structured logging setup shared by the node and wrapper binaries.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stratus_telemetry::{init_telemetry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TelemetryConfig::from_env();
//!     let guard = init_telemetry(config).expect("telemetry init");
//!
//!     // `guard.log_level_handle()` feeds the global log-level channel.
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `STRATUS_LOG` | `info` | `tracing` filter directives |
//! | `STRATUS_SERVICE_NAME` | `stratus` | Component name stamped on log lines |

pub mod config;

pub use config::TelemetryConfig;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// Telemetry initialization errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The filter directive string did not parse.
    #[error("invalid log filter: {0}")]
    InvalidFilter(String),
    /// A global subscriber is already installed.
    #[error("failed to install tracing subscriber: {0}")]
    SubscriberInit(String),
    /// The reload handle lost its subscriber.
    #[error("failed to reload log filter: {0}")]
    Reload(String),
}

/// Handle for changing the active log filter at runtime.
///
/// This is what the global-log-level control channel drives: a received
/// level packet turns into one [`set_filter`](Self::set_filter) call.
#[derive(Clone)]
pub struct LogLevelHandle {
    inner: reload::Handle<EnvFilter, Registry>,
}

impl LogLevelHandle {
    /// Replace the active filter with `directive` (e.g. `debug` or
    /// `stratus_net=trace,info`).
    pub fn set_filter(&self, directive: &str) -> Result<(), TelemetryError> {
        let filter = EnvFilter::try_new(directive)
            .map_err(|e| TelemetryError::InvalidFilter(e.to_string()))?;
        self.inner
            .reload(filter)
            .map_err(|e| TelemetryError::Reload(e.to_string()))
    }
}

/// Keeps telemetry alive and carries the runtime reload handle.
pub struct TelemetryGuard {
    log_level: LogLevelHandle,
}

impl TelemetryGuard {
    /// Handle for runtime log-level changes.
    #[must_use]
    pub fn log_level_handle(&self) -> LogLevelHandle {
        self.log_level.clone()
    }
}

/// Install the process-wide tracing subscriber.
///
/// Returns a guard carrying the log-level reload handle. Calling this
/// twice in one process fails: the subscriber is global.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let filter = EnvFilter::try_new(&config.log_filter)
        .map_err(|e| TelemetryError::InvalidFilter(e.to_string()))?;
    let (filter_layer, handle) = reload::Layer::new(filter);

    Registry::default()
        .with(filter_layer)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(config.log_thread_ids),
        )
        .try_init()
        .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        filter = %config.log_filter,
        "telemetry initialized"
    );

    Ok(TelemetryGuard { log_level: LogLevelHandle { inner: handle } })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_rejected() {
        let config = TelemetryConfig { log_filter: "not==valid==".into(), ..Default::default() };
        assert!(matches!(
            init_telemetry(config),
            Err(TelemetryError::InvalidFilter(_))
        ));
    }
}

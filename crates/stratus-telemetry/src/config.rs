//! Telemetry configuration.

/// Settings for [`init_telemetry`](crate::init_telemetry).
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Component name stamped on log lines (`stratus-node`, a service
    /// name, ...).
    pub service_name: String,
    /// Initial `tracing` filter directives.
    pub log_filter: String,
    /// Whether to include thread ids in log lines.
    pub log_thread_ids: bool,
}

impl TelemetryConfig {
    /// Build from environment variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service_name: std::env::var("STRATUS_SERVICE_NAME")
                .unwrap_or(defaults.service_name),
            log_filter: std::env::var("STRATUS_LOG").unwrap_or(defaults.log_filter),
            log_thread_ids: defaults.log_thread_ids,
        }
    }

    /// Override the component name.
    #[must_use]
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "stratus".to_string(),
            log_filter: "info".to_string(),
            log_thread_ids: false,
        }
    }
}

//! # relay-telemetry
//!
//! Logging and metrics setup shared by the relay binary and tests.
//!
//! - [`init_telemetry`] installs the global `tracing` subscriber (JSON or
//!   human-readable, filtered by `RUST_LOG` or the configured level) and,
//!   when enabled, the Prometheus metrics recorder.
//! - [`metrics`] holds the metric names used across the server.

#![deny(unsafe_code)]

pub mod metrics;

use metrics_exporter_prometheus::PrometheusHandle;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default level filter (e.g. `info`, `relay_server=debug`). Overridden by `RUST_LOG`.
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Install the Prometheus recorder.
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
            metrics_enabled: true,
        }
    }
}

/// Errors from telemetry initialization.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// A global subscriber is already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
    /// A global metrics recorder is already installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Handles produced by [`init_telemetry`].
pub struct Telemetry {
    prometheus: Option<PrometheusHandle>,
}

impl Telemetry {
    /// Prometheus handle for rendering `/metrics`, if metrics are enabled.
    pub fn prometheus(&self) -> Option<&PrometheusHandle> {
        self.prometheus.as_ref()
    }
}

/// Build the level filter: `RUST_LOG` if set and valid, else `default_level`,
/// else `info`.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize logging and metrics. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<Telemetry, TelemetryError> {
    let (json_layer, text_layer) = if config.json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true);
        (Some(layer), None)
    } else {
        let layer = tracing_subscriber::fmt::layer().with_target(true);
        (None, Some(layer))
    };

    tracing_subscriber::registry()
        .with(env_filter(&config.log_level))
        .with(json_layer)
        .with(text_layer)
        .try_init()?;

    let prometheus = if config.metrics_enabled {
        let handle = metrics::install_recorder()?;
        metrics::describe();
        Some(handle)
    } else {
        None
    };

    Ok(Telemetry { prometheus })
}

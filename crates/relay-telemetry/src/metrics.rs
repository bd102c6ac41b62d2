//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` endpoint.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from a recorder handle.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Register help text for every metric below.
pub fn describe() {
    ::metrics::describe_counter!(WS_CONNECTIONS_TOTAL, "WebSocket connections opened");
    ::metrics::describe_counter!(WS_DISCONNECTIONS_TOTAL, "WebSocket connections closed");
    ::metrics::describe_gauge!(WS_CONNECTIONS_ACTIVE, "Open WebSocket connections");
    ::metrics::describe_gauge!(USERS_ACTIVE, "User ids with at least one logged-in session");
    ::metrics::describe_counter!(FRAMES_RECEIVED_TOTAL, "Inbound text frames");
    ::metrics::describe_counter!(FRAMES_REJECTED_TOTAL, "Inbound frames dropped by the router");
    ::metrics::describe_counter!(LOGINS_TOTAL, "Login frames applied");
    ::metrics::describe_counter!(LOGOUTS_TOTAL, "Logout frames applied");
    ::metrics::describe_counter!(MESSAGES_RELAYED_TOTAL, "Relay frames routed");
    ::metrics::describe_counter!(DELIVERIES_TOTAL, "Outbound frames queued to a session");
    ::metrics::describe_counter!(DELIVERY_FAILURES_TOTAL, "Outbound frames that could not be queued");
    ::metrics::describe_counter!(UNKNOWN_TARGET_TOTAL, "Unicasts dropped for lack of a recipient");
    ::metrics::describe_counter!(SLOW_CLIENT_EVICTIONS_TOTAL, "Connections closed for overflowing their queue");
    ::metrics::describe_histogram!(WS_CONNECTION_DURATION_SECONDS, "WebSocket connection lifetime");
}

// Metric name constants to avoid typos across crates.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Logged-in user ids (gauge).
pub const USERS_ACTIVE: &str = "relay_users_active";
/// Inbound frames total (counter).
pub const FRAMES_RECEIVED_TOTAL: &str = "relay_frames_received_total";
/// Rejected frames total (counter, labels: reason).
pub const FRAMES_REJECTED_TOTAL: &str = "relay_frames_rejected_total";
/// Logins total (counter).
pub const LOGINS_TOTAL: &str = "relay_logins_total";
/// Logouts total (counter, labels: cause).
pub const LOGOUTS_TOTAL: &str = "relay_logouts_total";
/// Relayed messages total (counter, labels: route).
pub const MESSAGES_RELAYED_TOTAL: &str = "relay_messages_total";
/// Successful deliveries total (counter).
pub const DELIVERIES_TOTAL: &str = "relay_deliveries_total";
/// Failed deliveries total (counter, labels: reason).
pub const DELIVERY_FAILURES_TOTAL: &str = "relay_delivery_failures_total";
/// Unicasts to an offline user total (counter).
pub const UNKNOWN_TARGET_TOTAL: &str = "relay_unknown_target_total";
/// Slow clients evicted total (counter).
pub const SLOW_CLIENT_EVICTIONS_TOTAL: &str = "relay_slow_client_evictions_total";
/// WebSocket connection duration seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";

//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a partial
//! JSON file only needs the keys it changes.

use serde::{Deserialize, Serialize};

/// Root settings for the relay server.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "routing": { "requireLogin": true }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener settings.
    pub server: ServerSettings,
    /// Per-connection queue and liveness settings.
    pub session: SessionSettings,
    /// Message routing policy.
    pub routing: RoutingSettings,
    /// Logging and metrics output.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Correct values that would make the server unusable.
    ///
    /// Called automatically during loading. Zero capacities and intervals are
    /// raised to a minimum with a warning rather than rejected.
    pub fn validate(&mut self) {
        fn at_least<T>(val: &mut T, min: T, name: &str)
        where
            T: PartialOrd + Copy + std::fmt::Display,
        {
            if *val < min {
                tracing::warn!("{name} too small ({val}), raised to {min}");
                *val = min;
            }
        }

        at_least(&mut self.server.max_frame_bytes, 64, "max_frame_bytes");
        at_least(&mut self.session.send_queue_capacity, 1, "send_queue_capacity");
        at_least(&mut self.session.max_send_drops, 1, "max_send_drops");
        at_least(&mut self.session.heartbeat_interval_secs, 1, "heartbeat_interval_secs");

        let min_timeout = self.session.heartbeat_interval_secs * 2;
        at_least(&mut self.session.client_timeout_secs, min_timeout, "client_timeout_secs");

        if !self.server.ws_path.starts_with('/') {
            let fixed = format!("/{}", self.server.ws_path);
            tracing::warn!(path = %self.server.ws_path, %fixed, "ws_path must be absolute");
            self.server.ws_path = fixed;
        }
    }
}

/// Listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port. `0` picks a free port.
    pub port: u16,
    /// WebSocket endpoint path.
    pub ws_path: String,
    /// Largest accepted inbound frame/message in bytes.
    pub max_frame_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8089,
            ws_path: "/ws".to_string(),
            max_frame_bytes: 64 * 1024,
        }
    }
}

/// Per-connection settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Bounded outbound queue length per connection.
    pub send_queue_capacity: usize,
    /// Lifetime queue overflows tolerated before a slow client is evicted.
    pub max_send_drops: u64,
    /// Interval between server pings.
    pub heartbeat_interval_secs: u64,
    /// Close connections that have not answered a ping within this window.
    pub client_timeout_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            send_queue_capacity: 256,
            max_send_drops: 100,
            heartbeat_interval_secs: 30,
            client_timeout_secs: 90,
        }
    }
}

/// Message routing policy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutingSettings {
    /// Reject relays from connections that never logged in.
    ///
    /// Off by default: an anonymous sender's `userId` field is used as the
    /// `from` label.
    pub require_login: bool,
}

/// Logging and metrics output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level filter; `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Install the Prometheus recorder and serve `/metrics`.
    pub metrics_enabled: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            metrics_enabled: true,
        }
    }
}

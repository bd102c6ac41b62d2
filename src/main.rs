//! # relay
//!
//! WebSocket message relay binary: loads settings, installs telemetry and
//! serves until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use relay_settings::RelaySettings;
use relay_telemetry::TelemetryConfig;

/// WebSocket message relay server.
#[derive(Parser, Debug)]
#[command(name = "relay", about = "WebSocket message relay server")]
struct Cli {
    /// Settings file (defaults to `~/.relay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log level filter (overrides settings; `RUST_LOG` still wins).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match cli.config {
        Some(ref path) => relay_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => relay_settings::load_settings().context("Failed to load settings")?,
    };
    cli.apply(&mut settings);

    let telemetry = relay_telemetry::init_telemetry(&TelemetryConfig {
        log_level: settings.logging.level.clone(),
        json: settings.logging.json,
        metrics_enabled: settings.logging.metrics_enabled,
    })
    .context("Failed to initialize telemetry")?;

    tracing::info!(
        host = %settings.server.host,
        port = settings.server.port,
        require_login = settings.routing.require_login,
        "starting relay"
    );

    let handle = relay_server::start(settings, telemetry.prometheus().cloned())
        .await
        .context("Failed to start server")?;
    tracing::info!(port = handle.port(), "relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    handle.shutdown().await;
    tracing::info!("relay stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from([
            "relay",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--log-level",
            "debug",
            "--json-logs",
        ]);
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn absent_flags_keep_settings() {
        let cli = Cli::parse_from(["relay"]);
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings, RelaySettings::default());
    }
}

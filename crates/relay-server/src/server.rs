//! HTTP surface: WebSocket upgrade, `/health`, `/metrics`, and startup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router as HttpRouter};
use metrics_exporter_prometheus::PrometheusHandle;
use relay_settings::RelaySettings;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::connection;
use crate::router::Router;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Message router and routing table.
    pub router: Arc<Router>,
    /// Effective settings.
    pub settings: Arc<RelaySettings>,
    /// Prometheus handle for `/metrics`, when a recorder is installed.
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    /// Build state with a fresh router.
    pub fn new(settings: RelaySettings, prometheus: Option<PrometheusHandle>) -> Self {
        let router = Arc::new(Router::new(&settings.routing, &settings.session));
        Self {
            router,
            settings: Arc::new(settings),
            prometheus,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> HttpRouter {
    let ws_path = state.settings.server.ws_path.clone();
    HttpRouter::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind the listener and start serving. Returns a handle to shut it down.
pub async fn start(
    settings: RelaySettings,
    prometheus: Option<PrometheusHandle>,
) -> Result<ServerHandle, std::io::Error> {
    let state = AppState::new(settings, prometheus);
    let router = Arc::clone(&state.router);
    let server = &state.settings.server;
    let session = &state.settings.session;

    let liveness = connection::start_liveness_task(
        Arc::clone(&router),
        Duration::from_secs(session.heartbeat_interval_secs),
        Duration::from_secs(session.client_timeout_secs),
    );

    let addr = format!("{}:{}", server.host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, path = %server.ws_path, "relay server started");

    let shutdown = CancellationToken::new();
    let app = build_router(state);
    let serve_shutdown = shutdown.clone();
    let server_task = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok(ServerHandle {
        local_addr,
        router,
        shutdown,
        server: server_task,
        liveness,
    })
}

/// Handle returned by [`start`]. Keeps background tasks alive.
pub struct ServerHandle {
    /// Bound address (useful with port `0`).
    pub local_addr: SocketAddr,
    router: Arc<Router>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    liveness: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// The running router.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Stop accepting, close every connection, and wait for the server task.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let closed = self.router.close_all();
        tracing::info!(connections = closed, "shutting down");
        self.liveness.abort();
        let _ = self.server.await;
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let max = state.settings.server.max_frame_bytes;
    let session_settings = state.settings.session.clone();
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| connection::handle_socket(socket, state.router, session_settings))
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "connections": state.router.connection_count(),
        "users": state.router.user_count(),
    }))
}

/// Prometheus text exposition.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, relay_telemetry::metrics::render(handle)),
        None => (StatusCode::NOT_FOUND, "metrics disabled".to_string()),
    }
}

//! Per-connection WebSocket handling.
//!
//! Each socket is split into a writer task (outbound queue + pings) and a
//! reader task (inbound frames, in order, to the router). Whichever ends
//! first tears the other down, then the router's disconnect hook runs.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, Utf8Bytes, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::histogram;
use relay_core::ConnectionId;
use relay_settings::SessionSettings;
use relay_telemetry::metrics as m;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::router::Router;

/// Close code sent when the server drops a connection (slow or unresponsive
/// client, shutdown).
const CLOSE_GOING_AWAY: u16 = 1001;

/// Run one WebSocket connection to completion.
pub async fn handle_socket(socket: WebSocket, router: Arc<Router>, settings: SessionSettings) {
    let started = Instant::now();
    let conn_id = ConnectionId::new();
    let (tx, mut rx) = mpsc::channel::<Arc<str>>(settings.send_queue_capacity);
    let session = router.on_connect(conn_id.clone(), tx);
    let writer_closed = session.close_token();

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: outbound queue → socket, plus periodic ping. Owns the close
    // handshake when the router ends the session.
    let writer_cid = conn_id.clone();
    let heartbeat = Duration::from_secs(settings.heartbeat_interval_secs);
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(text) = frame else { break };
                    if ws_tx.send(WsMessage::Text(text.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    trace!(conn_id = %writer_cid, "sent ping");
                }
                () = writer_closed.cancelled() => {
                    let frame = CloseFrame {
                        code: CLOSE_GOING_AWAY,
                        reason: Utf8Bytes::from_static("closed by server"),
                    };
                    let _ = ws_tx.send(WsMessage::Close(Some(frame))).await;
                    break;
                }
            }
        }
    });

    // Reader: socket → router, one frame at a time.
    let reader_cid = conn_id.clone();
    let reader_router = Arc::clone(&router);
    let reader_session = Arc::clone(&session);
    let mut reader = tokio::spawn(async move {
        while let Some(msg) = ws_rx.next().await {
            let Ok(msg) = msg else { break };
            reader_session.touch();
            match msg {
                WsMessage::Text(text) => {
                    if let Err(e) = reader_router.on_frame(&reader_cid, text.as_str()) {
                        warn!(conn_id = %reader_cid, error = %e, "frame rejected");
                    }
                }
                WsMessage::Binary(_) => {
                    debug!(conn_id = %reader_cid, "ignoring binary frame");
                }
                WsMessage::Close(_) => break,
                // axum answers pings itself; pongs only refresh liveness.
                WsMessage::Ping(_) | WsMessage::Pong(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    let _ = router.on_disconnect(&conn_id);
    histogram!(m::WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

/// Start a background task that periodically closes unresponsive clients.
pub fn start_liveness_task(
    router: Arc<Router>,
    interval: Duration,
    timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            let _ = ticker.tick().await;
            let removed = router.evict_idle(timeout);
            if removed > 0 {
                tracing::info!(removed, "unresponsive client cleanup");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::DeliveryError;

    struct Discard;

    impl crate::session::Outbound for Discard {
        fn try_deliver(&self, _frame: Arc<str>) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_task_evicts_silent_sessions() {
        let router = Arc::new(Router::with_policy(false, 100));
        let session = router.on_connect(ConnectionId::from_raw("quiet"), Discard);

        let task = start_liveness_task(
            Arc::clone(&router),
            Duration::from_secs(30),
            Duration::from_secs(90),
        );
        tokio::time::sleep(Duration::from_secs(125)).await;

        assert!(session.is_closed());
        assert_eq!(router.connection_count(), 0);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_task_keeps_active_sessions() {
        let router = Arc::new(Router::with_policy(false, 100));
        let session = router.on_connect(ConnectionId::from_raw("busy"), Discard);

        let task = start_liveness_task(
            Arc::clone(&router),
            Duration::from_secs(30),
            Duration::from_secs(90),
        );
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_secs(20)).await;
            session.touch();
        }

        assert!(!session.is_closed());
        assert_eq!(router.connection_count(), 1);
        task.abort();
    }
}

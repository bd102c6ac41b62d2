#![allow(missing_docs)]

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use relay_server::{start, ServerHandle};
use relay_settings::RelaySettings;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn local_settings() -> RelaySettings {
    let mut settings = RelaySettings::default();
    settings.server.host = "127.0.0.1".into();
    settings.server.port = 0;
    settings
}

async fn connect(handle: &ServerHandle) -> Client {
    let url = format!("ws://127.0.0.1:{}/ws", handle.port());
    let (ws, _) = connect_async(url).await.expect("websocket connect");
    ws
}

async fn send(ws: &mut Client, frame: Value) {
    ws.send(Message::text(frame.to_string())).await.unwrap();
}

/// Next text frame as JSON, skipping control frames.
async fn recv(ws: &mut Client) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for frame")
}

/// Assert nothing arrives within a short window.
async fn assert_silent(ws: &mut Client) {
    let result = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(result.is_err(), "unexpected frame: {result:?}");
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn alice_and_bob_exchange_messages() {
    let handle = start(local_settings(), None).await.unwrap();
    let router = handle.router().clone();

    let mut a = connect(&handle).await;
    let mut b = connect(&handle).await;
    send(&mut a, json!({"type": "1", "userId": "alice"})).await;
    send(&mut b, json!({"type": "1", "userId": "bob"})).await;
    wait_until("both logins", || router.user_count() == 2).await;

    send(&mut a, json!({"type": "0", "userId": "alice", "msg": "hi", "sendTo": "bob"})).await;
    assert_eq!(recv(&mut b).await, json!({"msg": "hi", "from": "alice"}));
    assert_silent(&mut a).await;

    // Alice leaves without logging out.
    a.close(None).await.unwrap();
    drop(a);
    wait_until("alice cleanup", || router.connection_count() == 1).await;
    assert_eq!(router.user_count(), 1);
    router.check_invariants().unwrap();

    // Unicast to the departed user is dropped; bob's connection still works.
    send(&mut b, json!({"type": "0", "userId": "bob", "msg": "still there?", "sendTo": "alice"})).await;
    send(&mut b, json!({"type": "0", "userId": "bob", "msg": "echo"})).await;
    assert_eq!(recv(&mut b).await, json!({"msg": "echo", "from": "bob"}));

    handle.shutdown().await;
}

#[tokio::test]
async fn broadcast_reaches_every_connection_including_sender() {
    let handle = start(local_settings(), None).await.unwrap();
    let router = handle.router().clone();

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(connect(&handle).await);
    }
    wait_until("three connections", || router.connection_count() == 3).await;

    send(&mut clients[0], json!({"userId": "anon", "msg": "hello all", "sendTo": ""})).await;
    for ws in &mut clients {
        assert_eq!(recv(ws).await, json!({"msg": "hello all", "from": "anon"}));
    }

    handle.shutdown().await;
}

#[tokio::test]
async fn multiple_devices_receive_unicast() {
    let handle = start(local_settings(), None).await.unwrap();
    let router = handle.router().clone();

    let mut phone = connect(&handle).await;
    let mut laptop = connect(&handle).await;
    let mut carol = connect(&handle).await;
    send(&mut phone, json!({"type": "1", "userId": "bob"})).await;
    send(&mut laptop, json!({"type": "1", "userId": "bob"})).await;
    wait_until("bob on two devices", || {
        router.sessions_for(&relay_core::UserId::from_raw("bob")) == 2
    })
    .await;

    send(&mut carol, json!({"type": "0", "userId": "carol", "msg": "ping", "sendTo": "bob"})).await;
    assert_eq!(recv(&mut phone).await["msg"], "ping");
    assert_eq!(recv(&mut laptop).await["msg"], "ping");
    assert_silent(&mut carol).await;

    handle.shutdown().await;
}

#[tokio::test]
async fn malformed_frames_do_not_close_the_connection() {
    let handle = start(local_settings(), None).await.unwrap();

    let mut ws = connect(&handle).await;
    ws.send(Message::text("definitely not json")).await.unwrap();
    send(&mut ws, json!({"type": "1"})).await;
    send(&mut ws, json!({"type": "0", "userId": {"nested": true}, "msg": "x"})).await;

    send(&mut ws, json!({"type": "0", "userId": "me", "msg": "still alive"})).await;
    assert_eq!(recv(&mut ws).await, json!({"msg": "still alive", "from": "me"}));

    handle.shutdown().await;
}

#[tokio::test]
async fn dropped_socket_is_cleaned_up() {
    let handle = start(local_settings(), None).await.unwrap();
    let router = handle.router().clone();

    let mut ws = connect(&handle).await;
    send(&mut ws, json!({"type": "1", "userId": "alice"})).await;
    wait_until("login", || router.user_count() == 1).await;

    // No close handshake.
    drop(ws);
    wait_until("cleanup", || router.connection_count() == 0).await;
    assert_eq!(router.user_count(), 0);
    router.check_invariants().unwrap();

    handle.shutdown().await;
}

#[tokio::test]
async fn oversized_frame_closes_connection() {
    let mut settings = local_settings();
    settings.server.max_frame_bytes = 256;
    let handle = start(settings, None).await.unwrap();
    let router = handle.router().clone();

    let mut ws = connect(&handle).await;
    wait_until("connect", || router.connection_count() == 1).await;

    let big = "x".repeat(4096);
    let _ = ws
        .send(Message::text(json!({"userId": "a", "msg": big}).to_string()))
        .await;
    wait_until("oversized cleanup", || router.connection_count() == 0).await;

    handle.shutdown().await;
}

#[tokio::test]
async fn health_reports_counts() {
    let handle = start(local_settings(), None).await.unwrap();
    let router = handle.router().clone();

    let mut ws = connect(&handle).await;
    let _anon = connect(&handle).await;
    send(&mut ws, json!({"type": "1", "userId": "alice"})).await;
    wait_until("login", || router.user_count() == 1 && router.connection_count() == 2).await;

    let url = format!("http://127.0.0.1:{}/health", handle.port());
    let body: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(body, json!({"status": "ok", "connections": 2, "users": 1}));

    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_clients() {
    let handle = start(local_settings(), None).await.unwrap();
    let router = handle.router().clone();

    let mut ws = connect(&handle).await;
    wait_until("connect", || router.connection_count() == 1).await;

    handle.shutdown().await;

    let next = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("client should observe close");
    match next {
        None | Some(Err(_)) | Some(Ok(Message::Close(_))) => {}
        other => panic!("expected close, got {other:?}"),
    }
}

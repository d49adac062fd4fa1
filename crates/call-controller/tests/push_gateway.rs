//! Push gateway acceptance tests.
//!
//! Runs the real server on an ephemeral port and drives it with an actual
//! WebSocket client: validation on open, event delivery, the inbound
//! relay, last-attach-wins, and close-on-delete.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

use call_controller::actors::{CallRegistryHandle, RelayMetrics};
use call_controller::config::Config;
use call_controller::media::LoopbackMediaBackend;
use call_controller::observability::HealthState;
use call_controller::routes::app_router;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite};

async fn spawn_server() -> SocketAddr {
    let config = Config::from_vars(&HashMap::new()).unwrap();
    let registry = CallRegistryHandle::new(
        Arc::new(LoopbackMediaBackend),
        &config,
        RelayMetrics::new(),
    );
    let health = Arc::new(HealthState::new());
    health.set_ready();
    let app = app_router(registry, health);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn create_call(client: &reqwest::Client, addr: SocketAddr) -> String {
    let body: Value = client
        .post(format!("http://{addr}/call"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body["payload"]["callId"].as_str().unwrap().to_string()
}

async fn connect_call(client: &reqwest::Client, addr: SocketAddr, call_id: &str) -> String {
    let body: Value = client
        .post(format!("http://{addr}/call/{call_id}/connect"))
        .json(&json!({"name": "Alice"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body["payload"]["connectionId"].as_str().unwrap().to_string()
}

fn ws_url(addr: SocketAddr, call_id: &str, connection_id: &str) -> String {
    format!("ws://{addr}/notifications?callId={call_id}&connectionId={connection_id}")
}

/// The server attaches the channel after the upgrade completes; wait until
/// diagnostics confirm it before driving traffic that depends on it.
async fn wait_attached(
    client: &reqwest::Client,
    addr: SocketAddr,
    call_id: &str,
    connection_id: &str,
) {
    for _ in 0..100 {
        let info: Value = client
            .get(format!("http://{addr}/call/{call_id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let attached = info["payload"]["connections"]
            .as_array()
            .unwrap()
            .iter()
            .any(|conn| conn["connectionId"] == connection_id && conn["state"] == "attached");
        if attached {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("push channel never attached");
}

type WsClient =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Receive the next text frame as decoded JSON, with a test deadline.
async fn next_json(ws: &mut WsClient) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for frame")
        .expect("stream ended")
        .expect("transport error");
    match frame {
        tungstenite::Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn test_open_with_unknown_ids_is_rejected() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();

    // Unknown call: rejected at upgrade time.
    let err = connect_async(ws_url(addr, "nope", "whatever"))
        .await
        .unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status().as_u16(), 404),
        other => panic!("unexpected error: {other:?}"),
    }

    // Known call, unknown connection: also rejected, no partial attach.
    let call_id = create_call(&client, addr).await;
    let err = connect_async(ws_url(addr, &call_id, "bogus"))
        .await
        .unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status().as_u16(), 400),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_notification_comes_back_as_media_event() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();

    let call_id = create_call(&client, addr).await;
    let connection_id = connect_call(&client, addr, &call_id).await;

    let (mut ws, _) = connect_async(ws_url(addr, &call_id, &connection_id))
        .await
        .unwrap();
    wait_attached(&client, addr, &call_id, &connection_id).await;

    // The loopback backend reflects notifications back as events targeted
    // at the same connection.
    client
        .post(format!("http://{addr}/call/{call_id}/message/{connection_id}"))
        .json(&json!({"message": {"notification": true, "method": "producerPaused"}}))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();

    let frame = next_json(&mut ws).await;
    assert_eq!(frame["type"], "mediaEvent");
    assert_eq!(frame["data"]["method"], "producerPaused");
}

#[tokio::test]
async fn test_inbound_relayed_message_is_forwarded() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();

    let call_id = create_call(&client, addr).await;
    let connection_id = connect_call(&client, addr, &call_id).await;

    let (mut ws, _) = connect_async(ws_url(addr, &call_id, &connection_id))
        .await
        .unwrap();

    ws.send(tungstenite::Message::Text(
        json!({"type": "relayedMessage", "data": {"method": "leave"}}).to_string(),
    ))
    .await
    .unwrap();

    // Loopback echo: the forwarded notification returns as a media event.
    let frame = next_json(&mut ws).await;
    assert_eq!(frame["type"], "mediaEvent");
    assert_eq!(frame["data"]["method"], "leave");
}

#[tokio::test]
async fn test_unsupported_inbound_frames_do_not_kill_the_channel() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();

    let call_id = create_call(&client, addr).await;
    let connection_id = connect_call(&client, addr, &call_id).await;

    let (mut ws, _) = connect_async(ws_url(addr, &call_id, &connection_id))
        .await
        .unwrap();

    // Garbage, a non-relayed envelope, and binary: all ignored.
    ws.send(tungstenite::Message::Text("not json".to_string()))
        .await
        .unwrap();
    ws.send(tungstenite::Message::Text(
        json!({"type": "mediaEvent", "data": {}}).to_string(),
    ))
    .await
    .unwrap();
    ws.send(tungstenite::Message::Binary(vec![1, 2, 3]))
        .await
        .unwrap();

    // The channel still works end to end.
    ws.send(tungstenite::Message::Text(
        json!({"type": "relayedMessage", "data": {"method": "still-alive"}}).to_string(),
    ))
    .await
    .unwrap();
    let frame = next_json(&mut ws).await;
    assert_eq!(frame["data"]["method"], "still-alive");
}

#[tokio::test]
async fn test_delete_call_closes_channel_with_reason() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();

    let call_id = create_call(&client, addr).await;
    let connection_id = connect_call(&client, addr, &call_id).await;

    let (mut ws, _) = connect_async(ws_url(addr, &call_id, &connection_id))
        .await
        .unwrap();
    wait_attached(&client, addr, &call_id, &connection_id).await;

    client
        .delete(format!("http://{addr}/call/{call_id}"))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for close")
        .expect("stream ended")
        .expect("transport error");
    match frame {
        tungstenite::Message::Close(Some(close)) => {
            assert_eq!(close.reason, "call deleted");
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn test_second_attach_supersedes_first() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();

    let call_id = create_call(&client, addr).await;
    let connection_id = connect_call(&client, addr, &call_id).await;

    let (mut first, _) = connect_async(ws_url(addr, &call_id, &connection_id))
        .await
        .unwrap();
    wait_attached(&client, addr, &call_id, &connection_id).await;

    let (mut second, _) = connect_async(ws_url(addr, &call_id, &connection_id))
        .await
        .unwrap();

    // The first channel is told to close.
    let frame = tokio::time::timeout(Duration::from_secs(5), first.next())
        .await
        .expect("timed out waiting for close")
        .expect("stream ended")
        .expect("transport error");
    match frame {
        tungstenite::Message::Close(Some(close)) => {
            assert!(close.reason.contains("superseded"));
        }
        other => panic!("unexpected frame: {other:?}"),
    }

    // The second channel carries traffic; the first socket's teardown must
    // not have detached it.
    ws_roundtrip(&mut second).await;
}

async fn ws_roundtrip(ws: &mut WsClient) {
    ws.send(tungstenite::Message::Text(
        json!({"type": "relayedMessage", "data": {"method": "ping"}}).to_string(),
    ))
    .await
    .unwrap();
    let frame = next_json(ws).await;
    assert_eq!(frame["data"]["method"], "ping");
}

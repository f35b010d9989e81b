//! Full round trips over real HTTP and WebSocket connections against an
//! in-memory broker.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use switchboard_broker::InMemoryBroker;
use switchboard_server::{start, EchoResponder, ServerConfig, ServerHandle};
use switchboard_telemetry::MetricsRecorder;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> ServerHandle {
    spawn_server_with(ServerConfig::default()).await
}

async fn spawn_server_with(config: ServerConfig) -> ServerHandle {
    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ..config
    };
    start(
        config,
        Arc::new(InMemoryBroker::new()),
        Arc::new(EchoResponder),
        Arc::new(MetricsRecorder::new()),
    )
    .await
    .unwrap()
}

fn url(handle: &ServerHandle, path: &str) -> String {
    format!("http://127.0.0.1:{}{path}", handle.port)
}

async fn post(handle: &ServerHandle, path: &str, body: Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(url(handle, path))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

async fn sign_in(handle: &ServerHandle, alias: &str) -> String {
    let (status, body) = post(handle, "/sign_in", json!({"alias": alias})).await;
    assert_eq!(status, 200, "body: {body}");
    body["payload"].as_str().unwrap().to_string()
}

async fn connect(handle: &ServerHandle) -> Ws {
    let (ws, _) = connect_async(format!("ws://127.0.0.1:{}/ws", handle.port))
        .await
        .unwrap();
    ws
}

async fn send(ws: &mut Ws, frame: Value) {
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

async fn recv(ws: &mut Ws) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn assert_silent(ws: &mut Ws) {
    let next = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(next.is_err(), "unexpected frame: {next:?}");
}

#[tokio::test]
async fn publish_is_acked_then_echoed() {
    let handle = spawn_server().await;
    let id = sign_in(&handle, "alice").await;
    let mut ws = connect(&handle).await;

    send(&mut ws, json!({"id": id, "msg_type": 1, "msg": "hi"})).await;

    let mut frames = vec![recv(&mut ws).await, recv(&mut ws).await];
    frames.sort_by_key(|f| f["payload"]["msg_type"].as_u64());
    assert_eq!(
        frames[0],
        json!({"status": {"success": true}, "payload": {"msg_type": 1}})
    );
    assert_eq!(
        frames[1],
        json!({"status": {"success": true}, "payload": {"msg_type": 2, "msg": "hi"}})
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn unknown_session_gets_failure_frame() {
    let handle = spawn_server().await;
    let mut ws = connect(&handle).await;

    send(&mut ws, json!({"id": "deadbeef", "msg_type": 1, "msg": "x"})).await;
    assert_eq!(
        recv(&mut ws).await,
        json!({"status": {"success": false, "cause": "unknown session"}})
    );

    // Connection stays usable.
    send(&mut ws, json!("garbage")).await;
    assert_eq!(
        recv(&mut ws).await,
        json!({"status": {"success": false, "cause": "error"}})
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn sign_in_is_idempotent_per_alias() {
    let handle = spawn_server().await;
    let first = sign_in(&handle, "bob").await;

    let (status, body) = post(&handle, "/sign_in", json!({"alias": "bob"})).await;
    assert_eq!(status, 202);
    assert_eq!(body["payload"], json!(first));

    let other = sign_in(&handle, "carol").await;
    assert_ne!(first, other);

    handle.shutdown().await;
}

#[tokio::test]
async fn sign_out_releases_alias() {
    let handle = spawn_server().await;
    let first = sign_in(&handle, "dave").await;

    let (status, body) = post(&handle, "/sign_out", json!({"id": first})).await;
    assert_eq!(status, 200);
    assert_eq!(body["payload"], json!("ok"));

    let second = sign_in(&handle, "dave").await;
    assert_ne!(first, second);

    // The old id no longer resolves.
    let mut ws = connect(&handle).await;
    send(&mut ws, json!({"id": first, "msg_type": 1, "msg": "x"})).await;
    assert_eq!(
        recv(&mut ws).await["status"]["cause"],
        json!("unknown session")
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn malformed_http_requests_are_rejected() {
    let handle = spawn_server().await;
    let ko = json!({"status": {"success": false, "cause": "ko"}});

    for body in [json!({}), json!({"alias": 7}), json!({"alias": "  "})] {
        let (status, reply) = post(&handle, "/sign_in", body).await;
        assert_eq!(status, 400);
        assert_eq!(reply, ko);
    }

    let resp = reqwest::Client::new()
        .post(url(&handle, "/sign_in"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    let (status, _) = post(&handle, "/sign_out", json!({"nope": true})).await;
    assert_eq!(status, 400);

    handle.shutdown().await;
}

#[tokio::test]
async fn sessions_are_isolated() {
    let handle = spawn_server().await;
    let erin = sign_in(&handle, "erin").await;
    let frank = sign_in(&handle, "frank").await;
    let mut ws_erin = connect(&handle).await;
    let mut ws_frank = connect(&handle).await;

    // Bind frank's connection without producing traffic.
    send(&mut ws_frank, json!({"id": frank, "msg_type": 9})).await;
    send(&mut ws_erin, json!({"id": erin, "msg_type": 1, "msg": {"n": 1}})).await;

    let mut frames = vec![recv(&mut ws_erin).await, recv(&mut ws_erin).await];
    frames.sort_by_key(|f| f["payload"]["msg_type"].as_u64());
    assert_eq!(frames[1]["payload"]["msg"], json!({"n": 1}));
    assert_silent(&mut ws_frank).await;

    handle.shutdown().await;
}

#[tokio::test]
async fn replies_follow_the_latest_binding() {
    let handle = spawn_server().await;
    let id = sign_in(&handle, "hank").await;
    let mut first = connect(&handle).await;
    let mut second = connect(&handle).await;

    send(&mut first, json!({"id": id, "msg_type": 9})).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    send(&mut second, json!({"id": id, "msg_type": 1, "msg": "to second"})).await;

    let mut frames = vec![recv(&mut second).await, recv(&mut second).await];
    frames.sort_by_key(|f| f["payload"]["msg_type"].as_u64());
    assert_eq!(frames[1]["payload"]["msg"], json!("to second"));
    assert_silent(&mut first).await;

    // Closing the replaced connection must not clear the newer binding.
    first.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let health: Value = reqwest::get(url(&handle, "/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["payload"]["bound"], json!(1));
    assert_eq!(health["payload"]["connections"], json!(1));

    send(&mut second, json!({"id": id, "msg_type": 1, "msg": "still here"})).await;
    let mut frames = vec![recv(&mut second).await, recv(&mut second).await];
    frames.sort_by_key(|f| f["payload"]["msg_type"].as_u64());
    assert_eq!(frames[1]["payload"]["msg"], json!("still here"));

    handle.shutdown().await;
}

#[tokio::test]
async fn zero_heartbeat_does_not_break_connections() {
    let mut config = ServerConfig::default();
    config.gateway.heartbeat_interval = Duration::ZERO;
    let handle = spawn_server_with(config).await;
    let id = sign_in(&handle, "iris").await;
    let mut ws = connect(&handle).await;

    send(&mut ws, json!({"id": id, "msg_type": 1, "msg": "ping"})).await;
    let mut frames = vec![recv(&mut ws).await, recv(&mut ws).await];
    frames.sort_by_key(|f| f["payload"]["msg_type"].as_u64());
    assert_eq!(
        frames[0],
        json!({"status": {"success": true}, "payload": {"msg_type": 1}})
    );
    assert_eq!(frames[1]["payload"]["msg"], json!("ping"));

    handle.shutdown().await;
}

#[tokio::test]
async fn health_reports_sessions_and_counters() {
    let handle = spawn_server().await;
    let id = sign_in(&handle, "gina").await;
    let mut ws = connect(&handle).await;
    send(&mut ws, json!({"id": id, "msg_type": 1, "msg": "x"})).await;
    let _ = recv(&mut ws).await;
    let _ = recv(&mut ws).await;

    let body: Value = reqwest::get(url(&handle, "/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"]["success"], json!(true));
    assert_eq!(body["payload"]["sessions"], json!(1));
    assert_eq!(body["payload"]["connections"], json!(1));
    assert_eq!(body["payload"]["counters"]["gateway.published"], json!(1));
    assert_eq!(body["payload"]["counters"]["router.forwarded"], json!(1));

    handle.shutdown().await;
}

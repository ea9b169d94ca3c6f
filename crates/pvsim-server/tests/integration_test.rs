//! Integration tests for the variable WebSocket server.
//!
//! These tests start an actual server and connect with a WebSocket client
//! to verify end-to-end functionality.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;

use pvsim_core::DeviceSpec;
use pvsim_providers::{DeviceRegistry, PeriodicTask, Simulation, VariableClient, VariableDriver};
use pvsim_server::{LocalClient, ServerConfig, ServerError, VariableServer};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    client: LocalClient,
    shutdown: oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<Result<(), ServerError>>,
}

/// Find an available port for testing.
async fn find_available_port() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn registry() -> DeviceRegistry {
    let spec = |source: &str, dtype: &str| DeviceSpec {
        module: "f144".to_string(),
        source: Some(source.to_string()),
        topic: Some("sim_data".to_string()),
        dtype: Some(dtype.to_string()),
        value_units: None,
    };

    let mut specs = BTreeMap::new();
    specs.insert("entry/count".to_string(), spec("SIM_count", "int"));
    specs.insert("entry/temp".to_string(), spec("SIM_temp", "double"));
    DeviceRegistry::from_specs(&specs)
}

/// Start a test server and return its address, local client and controls.
async fn start_test_server() -> TestServer {
    let addr = find_available_port().await;

    let config = ServerConfig {
        name: "test-server".to_string(),
        bind_addr: addr,
        ..ServerConfig::default()
    };

    let server = VariableServer::build(config, &registry()).unwrap();
    let client = server.client();
    let (shutdown, shutdown_rx) = oneshot::channel::<()>();

    let handle = tokio::spawn(server.run(async move {
        let _ = shutdown_rx.await;
    }));

    // Give server time to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        addr,
        client,
        shutdown,
        handle,
    }
}

async fn connect_client(addr: SocketAddr) -> Client {
    connect_client_with_params(addr, "").await
}

async fn connect_client_with_params(addr: SocketAddr, params: &str) -> Client {
    let url = format!("ws://{}/?{}", addr, params);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("Failed to connect");
    ws_stream
}

/// Wait for a text message with timeout.
async fn recv_text(ws: &mut Client) -> Result<String, &'static str> {
    match timeout(Duration::from_secs(5), ws.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => Ok(text),
        Ok(Some(Ok(_))) => Err("Unexpected message type"),
        Ok(Some(Err(_))) => Err("WebSocket error"),
        Ok(None) => Err("Connection closed"),
        Err(_) => Err("Timeout"),
    }
}

async fn recv_json(ws: &mut Client) -> Value {
    let text = recv_text(ws).await.expect("Should receive a message");
    serde_json::from_str(&text).expect("Valid JSON")
}

/// Skip messages until the response to `request_id` arrives.
async fn recv_response(ws: &mut Client, request_id: &str) -> Value {
    loop {
        let msg = recv_json(ws).await;
        if msg["requestId"] == request_id {
            return msg;
        }
    }
}

/// Assert that nothing arrives within a short window.
async fn assert_silent(ws: &mut Client) {
    assert!(timeout(Duration::from_millis(200), ws.next()).await.is_err());
}

async fn send_json(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string()))
        .await
        .expect("Should send message");
}

#[tokio::test]
async fn test_hello_message_on_connect() {
    let server = start_test_server().await;
    let mut ws = connect_client(server.addr).await;

    let hello = recv_json(&mut ws).await;

    assert_eq!(hello["name"], "test-server");
    assert_eq!(hello["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(hello["variables"], 2);
    assert!(hello["timestamp"].is_string());

    ws.close(None).await.ok();
    server.handle.abort();
}

#[tokio::test]
async fn test_cached_values_on_connect() {
    let server = start_test_server().await;
    let mut ws = connect_client(server.addr).await;

    let _ = recv_json(&mut ws).await;
    let first = recv_json(&mut ws).await;
    let second = recv_json(&mut ws).await;

    assert_eq!(first["name"], "entry/count");
    assert_eq!(first["variable"]["value"], 0);
    assert_eq!(second["name"], "entry/temp");
    assert_eq!(second["variable"]["display"]["description"], "SIM_temp");

    ws.close(None).await.ok();
    server.handle.abort();
}

#[tokio::test]
async fn test_subscription_filtering() {
    let server = start_test_server().await;
    let mut ws = connect_client_with_params(server.addr, "subscribe=none&sendCachedValues=false").await;

    let _ = recv_json(&mut ws).await;
    assert_silent(&mut ws).await;

    send_json(&mut ws, json!({"subscribe": [{"name": "entry/temp"}]})).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    server.client.put("entry/count", json!(7)).unwrap();
    server.client.put("entry/temp", json!(21.5)).unwrap();

    let update = recv_json(&mut ws).await;
    assert_eq!(update["name"], "entry/temp");
    assert_eq!(update["variable"]["value"], 21.5);

    send_json(&mut ws, json!({"unsubscribe": [{"name": "entry/temp"}]})).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    server.client.put("entry/temp", json!(22.0)).unwrap();
    assert_silent(&mut ws).await;

    ws.close(None).await.ok();
    server.handle.abort();
}

#[tokio::test]
async fn test_put_and_get() {
    let server = start_test_server().await;
    let mut ws = connect_client_with_params(server.addr, "subscribe=none").await;
    let _ = recv_json(&mut ws).await;

    send_json(&mut ws, json!({"requestId": "1", "put": {"name": "entry/count", "value": 4.4}})).await;
    let response = recv_response(&mut ws, "1").await;
    assert_eq!(response["state"], "COMPLETED");
    assert_eq!(response["statusCode"], 200);
    assert_eq!(response["variable"]["value"], 4);

    send_json(&mut ws, json!({"requestId": "2", "get": "entry/count"})).await;
    let response = recv_response(&mut ws, "2").await;
    assert_eq!(response["statusCode"], 200);
    assert_eq!(response["variable"]["value"], 4);

    ws.close(None).await.ok();
    server.handle.abort();
}

#[tokio::test]
async fn test_bad_requests() {
    let server = start_test_server().await;
    let mut ws = connect_client_with_params(server.addr, "subscribe=none").await;
    let _ = recv_json(&mut ws).await;

    // Malformed messages are ignored and the connection stays usable
    ws.send(Message::Text("{not json".to_string())).await.unwrap();

    send_json(&mut ws, json!({"requestId": "1", "get": "entry/missing"})).await;
    let response = recv_response(&mut ws, "1").await;
    assert_eq!(response["state"], "FAILED");
    assert_eq!(response["statusCode"], 404);

    send_json(&mut ws, json!({"requestId": "2", "put": {"name": "entry/temp", "value": "hot"}})).await;
    let response = recv_response(&mut ws, "2").await;
    assert_eq!(response["state"], "FAILED");
    assert_eq!(response["statusCode"], 400);
    assert!(response.get("variable").is_none());

    ws.close(None).await.ok();
    server.handle.abort();
}

#[tokio::test]
async fn test_ping_pong() {
    let server = start_test_server().await;
    let mut ws = connect_client_with_params(server.addr, "sendCachedValues=false").await;
    let _ = recv_json(&mut ws).await;

    ws.send(Message::Ping(vec![1, 2, 3])).await.unwrap();
    match timeout(Duration::from_secs(5), ws.next()).await {
        Ok(Some(Ok(Message::Pong(data)))) => assert_eq!(data, vec![1, 2, 3]),
        other => panic!("Expected pong, got {:?}", other),
    }

    ws.close(None).await.ok();
    server.handle.abort();
}

#[tokio::test]
async fn test_variable_driver_updates_clients() {
    let server = start_test_server().await;
    let mut ws = connect_client_with_params(server.addr, "sendCachedValues=false").await;
    let _ = recv_json(&mut ws).await;

    let driver = VariableDriver::new(
        "entry/temp",
        Arc::new(server.client.clone()),
        Simulation::new(Some(1.0), None),
    );
    let mut task = PeriodicTask::new("entry/temp", driver, 0.01);
    task.start().unwrap();

    let update = recv_json(&mut ws).await;
    assert_eq!(update["name"], "entry/temp");
    assert_eq!(update["variable"]["value"], 1.0);

    tokio::task::spawn_blocking(move || task.stop())
        .await
        .unwrap()
        .unwrap();

    ws.close(None).await.ok();
    server.handle.abort();
}

#[tokio::test]
async fn test_shutdown() {
    let server = start_test_server().await;
    let mut ws = connect_client(server.addr).await;
    let _ = recv_json(&mut ws).await;

    server.shutdown.send(()).unwrap();

    let result = timeout(Duration::from_secs(5), server.handle)
        .await
        .expect("Server should stop")
        .unwrap();
    assert!(result.is_ok());
}

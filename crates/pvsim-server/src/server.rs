//! WebSocket variable server.
//!
//! This module provides the server that handles:
//! - Building the served variables from the device registry
//! - Hello message on connect
//! - Get and Put requests
//! - Update broadcasting filtered by per-client subscriptions

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use pvsim_core::{ControlVariable, ScalarValue, TargetError, TargetFile};
use pvsim_protocol::{
    encode_server_message, ClientMessage, HelloMessage, ResponseMessage, ServerMessage,
    VariableUpdate,
};
use pvsim_providers::{DeviceRegistry, DEFAULT_PERIOD};

use crate::subscription::SubscriptionManager;
use crate::variables::{LocalClient, Variables};

/// Capacity of the update broadcast channel.
const UPDATE_CAPACITY: usize = 1024;

type ConnectionResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Targets(#[from] TargetError),

    #[error("Failed to read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Configuration for the variable server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name sent in the Hello message.
    pub name: String,
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Default driver period in seconds.
    pub update_period: f64,
    /// Persisted target file. `None` disables seeding and persistence.
    pub target_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "pvsim".to_string(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5075)),
            update_period: DEFAULT_PERIOD,
            target_path: None,
        }
    }
}

impl ServerConfig {
    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ServerError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ServerError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Serves one control variable per typed device.
pub struct VariableServer {
    config: ServerConfig,
    variables: Arc<Variables>,
    targets: TargetFile,
}

impl VariableServer {
    /// Build the served variables and repair the target file.
    ///
    /// Each variable starts at its target value when one is configured, at
    /// the zero value of its dtype otherwise. An unreadable target file is
    /// fatal.
    pub fn build(config: ServerConfig, registry: &DeviceRegistry) -> Result<Self, ServerError> {
        let mut targets = match &config.target_path {
            Some(path) => TargetFile::load_or_create(path)?,
            None => {
                warn!("No target file configured, variables start at zero");
                TargetFile::in_memory()
            }
        };

        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        let mut variables = Variables::new(updates);

        for (name, device) in registry.iter() {
            let info = device.info();
            let Some(dtype) = info.dtype else {
                debug!("{} has no dtype, not served", name);
                continue;
            };

            let value = match targets.target_value(name) {
                Some(target) => ScalarValue::coerce(dtype, &json!(target)).unwrap_or_else(|e| {
                    warn!("Initial value for {}: {}", name, e);
                    ScalarValue::zero(dtype)
                }),
                None => ScalarValue::zero(dtype),
            };
            let variable = ControlVariable::new(value)
                .with_display(&info.source_name, info.value_units.as_deref());
            variables.insert(name.clone(), dtype, variable);
        }

        let added = targets.repair(variables.names())?;
        info!("Serving {} variables ({} new targets)", variables.len(), added);

        Ok(Self {
            config,
            variables: Arc::new(variables),
            targets,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn variables(&self) -> Arc<Variables> {
        self.variables.clone()
    }

    /// Target file as loaded and repaired at build time.
    pub fn targets(&self) -> &TargetFile {
        &self.targets
    }

    /// Client that writes through the variables' handlers in-process.
    pub fn client(&self) -> LocalClient {
        LocalClient::new(self.variables.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VariableUpdate> {
        self.variables.subscribe()
    }

    /// Run the server until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), ServerError> {
        let addr = self.config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        info!("Variable server listening on {}", addr);

        tokio::pin!(shutdown);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down variable server");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let name = self.config.name.clone();
                        let variables = self.variables.clone();
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, name, variables).await {
                                error!("Connection error from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        connections.shutdown().await;
        Ok(())
    }
}

/// Options negotiated through the handshake query string.
#[derive(Debug, Clone, PartialEq)]
struct ConnectionOptions {
    subscribe_all: bool,
    send_cached: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            subscribe_all: true,
            send_cached: true,
        }
    }
}

impl ConnectionOptions {
    fn from_query(query: &str) -> Self {
        let mut options = Self::default();
        for param in query.split('&') {
            if let Some((key, value)) = param.split_once('=') {
                match key {
                    "subscribe" => options.subscribe_all = value != "none",
                    "sendCachedValues" => options.send_cached = value != "false",
                    _ => {}
                }
            }
        }
        options
    }
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    name: String,
    variables: Arc<Variables>,
) -> ConnectionResult {
    info!("New connection from {}", addr);

    let mut options = ConnectionOptions::default();
    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            if let Some(query) = req.uri().query() {
                options = ConnectionOptions::from_query(query);
            }
            Ok(resp)
        },
    )
    .await?;

    // Subscribe before anything is sent so no update is missed
    let mut update_rx = variables.subscribe();
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let hello = HelloMessage::new(&name, env!("CARGO_PKG_VERSION"), variables.len());
    send(&mut ws_tx, &ServerMessage::Hello(hello)).await?;
    debug!("Sent Hello to {}", addr);

    let mut subscriptions = SubscriptionManager::new();
    if options.subscribe_all {
        subscriptions.subscribe_all();
    }

    if options.send_cached {
        for update in subscriptions.initial_updates(&variables) {
            send(&mut ws_tx, &ServerMessage::Update(update)).await?;
        }
    }

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_client_message(&text, &variables, &mut subscriptions, &mut ws_tx).await {
                            warn!("Error handling message from {}: {}", addr, e);
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {} closed connection", addr);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_tx.send(Message::Pong(data)).await?;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => {
                        info!("Client {} disconnected", addr);
                        break;
                    }
                    _ => {}
                }
            }

            update = update_rx.recv() => {
                match update {
                    Ok(update) => {
                        if subscriptions.wants(&update) {
                            if let Err(e) = send(&mut ws_tx, &ServerMessage::Update(update)).await {
                                error!("Failed to send update to {}: {}", addr, e);
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} lagged {} updates", addr, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Update channel closed");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Handle a message received from a client.
async fn handle_client_message(
    text: &str,
    variables: &Variables,
    subscriptions: &mut SubscriptionManager,
    ws_tx: &mut SplitSink<WebSocketStream<TcpStream>, Message>,
) -> ConnectionResult {
    let msg: ClientMessage = serde_json::from_str(text)?;

    match msg {
        ClientMessage::Subscribe(req) => {
            debug!("Client subscribed to {:?}", req.subscribe);
            for warning in subscriptions.add_subscriptions(&req.subscribe) {
                warn!("{}", warning);
            }
        }
        ClientMessage::Unsubscribe(req) => {
            debug!("Client unsubscribed from {:?}", req.unsubscribe);
            for sub in &req.unsubscribe {
                subscriptions.remove_subscription(&sub.name);
            }
        }
        ClientMessage::Get(req) => {
            let response = match variables.snapshot(&req.get) {
                Ok(variable) => ResponseMessage::completed(req.request_id, variable),
                Err(e) => ResponseMessage::failed(req.request_id, e.status_code(), e.to_string()),
            };
            send(ws_tx, &ServerMessage::Response(response)).await?;
        }
        ClientMessage::Put(req) => {
            let response = match variables.put(&req.put.name, &req.put.value) {
                Ok(variable) => ResponseMessage::completed(req.request_id, variable),
                Err(e) => {
                    warn!("Rejected put: {}", e);
                    ResponseMessage::failed(req.request_id, e.status_code(), e.to_string())
                }
            };
            send(ws_tx, &ServerMessage::Response(response)).await?;
        }
    }

    Ok(())
}

async fn send(
    ws_tx: &mut SplitSink<WebSocketStream<TcpStream>, Message>,
    msg: &ServerMessage,
) -> ConnectionResult {
    let text = encode_server_message(msg)?;
    ws_tx.send(Message::Text(text)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvsim_core::{DeviceSpec, Dtype};
    use std::fs;

    fn registry() -> DeviceRegistry {
        let spec = |dtype: Option<&str>| DeviceSpec {
            module: "f144".to_string(),
            source: Some("SIM_source".to_string()),
            topic: Some("sim_topic".to_string()),
            dtype: dtype.map(String::from),
            value_units: Some("K".to_string()),
        };

        let mut specs = BTreeMap::new();
        specs.insert("entry/temp".to_string(), spec(Some("double")));
        specs.insert("entry/count".to_string(), spec(Some("int")));
        specs.insert("entry/untyped".to_string(), spec(None));
        DeviceRegistry::from_specs(&specs)
    }

    #[test]
    fn test_config_defaults() {
        let config: ServerConfig = serde_json::from_str(r#"{"name": "beamline"}"#).unwrap();
        assert_eq!(config.name, "beamline");
        assert_eq!(config.bind_addr, SocketAddr::from(([0, 0, 0, 0], 5075)));
        assert_eq!(config.update_period, 1.0);
        assert_eq!(config.target_path, None);
    }

    #[test]
    fn test_connection_options() {
        assert_eq!(ConnectionOptions::from_query(""), ConnectionOptions::default());

        let options = ConnectionOptions::from_query("subscribe=none&sendCachedValues=false");
        assert!(!options.subscribe_all);
        assert!(!options.send_cached);
    }

    #[test]
    fn test_build_seeds_and_repairs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.json");
        fs::write(&path, r#"{"entry/temp": {"target_value": 5.0, "std_dev": 0.1}}"#).unwrap();

        let config = ServerConfig {
            target_path: Some(path.clone()),
            ..ServerConfig::default()
        };
        let server = VariableServer::build(config, &registry()).unwrap();
        let variables = server.variables();

        let names: Vec<&str> = variables.names().collect();
        assert_eq!(names, vec!["entry/count", "entry/temp"]);

        let temp = variables.snapshot("entry/temp").unwrap();
        assert_eq!(temp.value, ScalarValue::Double(5.0));
        assert_eq!(temp.display.description, "SIM_source");
        assert_eq!(temp.display.units, "K");
        assert_eq!(variables.snapshot("entry/count").unwrap().value, ScalarValue::Int(0));
        assert_eq!(variables.get("entry/count").unwrap().dtype(), Dtype::Int);

        let persisted: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            persisted,
            json!({
                "entry/temp": {"target_value": 5.0, "std_dev": 0.1},
                "entry/count": {"target_value": null, "std_dev": null}
            })
        );
    }

    #[test]
    fn test_build_without_target_file() {
        let server = VariableServer::build(ServerConfig::default(), &registry()).unwrap();
        assert_eq!(server.variables().len(), 2);
        assert_eq!(server.targets().path(), None);
    }

    #[test]
    fn test_malformed_target_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.json");
        fs::write(&path, "not json").unwrap();

        let config = ServerConfig {
            target_path: Some(path),
            ..ServerConfig::default()
        };
        assert!(matches!(
            VariableServer::build(config, &registry()),
            Err(ServerError::Targets(_))
        ));
    }
}

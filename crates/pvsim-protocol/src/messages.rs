//! Protocol message types for WebSocket communication.
//!
//! This module defines all message types exchanged with variable clients:
//! - Server → Client: Hello, Update, Response
//! - Client → Server: Subscribe, Unsubscribe, Get, Put
//!
//! Messages are serialized as JSON over WebSocket text frames.

use pvsim_core::ControlVariable;
use serde::{Deserialize, Serialize};

/// Subscription request message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub subscribe: Vec<Subscription>,
}

/// A single subscription entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Variable name or wildcard pattern (e.g. "entry/*")
    pub name: String,
}

/// Unsubscribe request message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    pub unsubscribe: Vec<Subscription>,
}

/// Read the current state of one variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub get: String,
}

/// PUT request message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub put: PutSpec,
}

/// Target and value of a PUT request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutSpec {
    pub name: String,
    pub value: serde_json::Value,
}

/// Response to a Get or Put request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub state: RequestState,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Variable state after the request completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable: Option<ControlVariable>,
}

impl ResponseMessage {
    pub fn completed(request_id: impl Into<String>, variable: ControlVariable) -> Self {
        Self {
            request_id: request_id.into(),
            state: RequestState::Completed,
            status_code: 200,
            message: None,
            variable: Some(variable),
        }
    }

    pub fn failed(request_id: impl Into<String>, status_code: u16, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            state: RequestState::Failed,
            status_code,
            message: Some(message.into()),
            variable: None,
        }
    }
}

/// Request state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestState {
    Completed,
    Failed,
}

/// A variable changed; sent to every subscribed client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableUpdate {
    pub name: String,
    pub variable: ControlVariable,
}

// ============================================================================
// Hello Message (Server → Client on connect)
// ============================================================================

/// Hello message sent by server immediately on WebSocket connection.
///
/// # Example
/// ```json
/// {
///   "name": "pvsim",
///   "version": "0.1.0",
///   "variables": 12,
///   "timestamp": "2024-01-17T10:30:00.000Z"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloMessage {
    /// Server name identifier.
    pub name: String,

    /// Server version.
    pub version: String,

    /// Number of served variables.
    pub variables: usize,

    /// Current server timestamp in ISO 8601 format.
    pub timestamp: String,
}

impl HelloMessage {
    /// Create a new Hello message.
    pub fn new(name: impl Into<String>, version: impl Into<String>, variables: usize) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            variables,
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }
    }
}

// ============================================================================
// Unified Message Enums
// ============================================================================

/// Messages that can be sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Hello message sent on connection.
    Hello(HelloMessage),

    /// New state of a variable.
    Update(VariableUpdate),

    /// Response to a Get or Put request.
    Response(ResponseMessage),
}

/// Messages that can be received from client.
///
/// Uses untagged deserialization - the message type is determined by
/// examining which fields are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    /// Subscribe to variable updates.
    Subscribe(SubscribeRequest),

    /// Unsubscribe from variable updates.
    Unsubscribe(UnsubscribeRequest),

    /// Read a variable.
    Get(GetRequest),

    /// Write a variable.
    Put(PutRequest),
}

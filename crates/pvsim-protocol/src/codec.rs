//! WebSocket message codec.
//!
//! Variable clients exchange JSON messages over WebSocket text frames. This
//! module provides encoding and decoding utilities for those messages, and
//! the error type shared with the channel message schemas.

use crate::messages::{ClientMessage, ServerMessage};
use thiserror::Error;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization failed.
    #[error("Failed to serialize message: {0}")]
    SerializeError(#[from] serde_json::Error),

    /// Received binary frame instead of text.
    #[error("Expected text frame, received binary")]
    BinaryFrame,

    /// Payload is shorter than its schema identifier.
    #[error("Payload too short for a schema identifier")]
    Truncated,

    /// Payload was encoded with another schema.
    #[error("Expected schema {expected}, found {found}")]
    WrongSchema { expected: &'static str, found: String },
}

/// Encode a server message to JSON string for WebSocket transmission.
pub fn encode_server_message(msg: &ServerMessage) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(CodecError::from)
}

/// Decode a client message from JSON string received over WebSocket.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, CodecError> {
    serde_json::from_str(text).map_err(CodecError::from)
}

/// Encode a client message (used by monitoring clients).
pub fn encode_client_message(msg: &ClientMessage) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(CodecError::from)
}

/// Decode a server message (used by monitoring clients).
pub fn decode_server_message(text: &str) -> Result<ServerMessage, CodecError> {
    serde_json::from_str(text).map_err(CodecError::from)
}

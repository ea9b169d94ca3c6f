//! # pvsim-protocol
//!
//! Message types and codecs.
//!
//! This crate defines the WebSocket message formats exchanged with variable
//! clients and the kind-specific channel messages published on the bus.

pub mod codec;
pub mod messages;
pub mod schema;

pub use codec::{
    decode_client_message, decode_server_message, encode_client_message, encode_server_message,
    CodecError,
};
pub use messages::*;
pub use schema::{LogData, TriggerData};

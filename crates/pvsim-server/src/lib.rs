//! # pvsim-server
//!
//! Serves one control variable per simulated device over WebSocket.
//!
//! Variables are writable both by remote clients (Put requests) and
//! in-process through [`LocalClient`]. Every write is broadcast to the
//! connections subscribed to that variable.

pub mod server;
pub mod subscription;
pub mod variables;

pub use server::{ServerConfig, ServerError, VariableServer};
pub use subscription::{ClientSubscription, SubscriptionManager};
pub use variables::{LocalClient, SharedVariable, Variables, WriteError};

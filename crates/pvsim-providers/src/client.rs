//! Variable-write seam used by the variable driver.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Rejected write to {name}: {reason}")]
    Rejected { name: String, reason: String },

    #[error("Connection failed: {0}")]
    Connection(String),
}

/// Writes values to named control variables.
pub trait VariableClient: Send + Sync {
    fn put(&self, name: &str, value: serde_json::Value) -> Result<(), ClientError>;
}

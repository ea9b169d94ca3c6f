//! Message-bus producer seam.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Flush timed out with {0} messages pending")]
    FlushTimeout(usize),
}

/// Publishes encoded payloads to named topics.
///
/// Implementations are shared between publishing tasks, so they must be
/// usable through `&self` from several threads.
pub trait Producer: Send + Sync {
    fn produce(&self, topic: &str, payload: &[u8]) -> Result<(), BusError>;

    /// Block until every produced message has been delivered.
    fn flush(&self) -> Result<(), BusError>;
}

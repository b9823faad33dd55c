//! Error types for the relay hub.
//!
//! Message handling, fan-out and forwarding never fail outward; every failure
//! there degrades to a log line. `ServerError` only surfaces from the startup
//! paths (binding, listening) of [`crate::RelayServer`].

/// Errors raised while bringing the hub up or tearing it down.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Socket creation, bind, listen or accept failures
    #[error("Network error: {0}")]
    Network(String),
    /// Failures inside the hub itself (task join errors, closed channels)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Network(err.to_string())
    }
}

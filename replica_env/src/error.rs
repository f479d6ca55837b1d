//! Error types for the replica environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Observer is not connected, or its channel has been closed
    #[error("Observer unreachable: {0}")]
    ObserverUnreachable(String),
    
    /// The transport as a whole has shut down
    #[error("Transport closed")]
    TransportClosed,
}

impl EnvError {
    /// Creates an unreachable error.
    pub fn unreachable(observer: impl std::fmt::Display) -> Self {
        Self::ObserverUnreachable(observer.to_string())
    }
}

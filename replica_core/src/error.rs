//! Error taxonomy for the replication core.
//!
//! - `Configuration`: fatal at construction, registration is rejected
//! - `Transport`: recoverable, logged at the emission boundary
//! - `Decode`: recoverable, the offending update is dropped
//! - `InvariantViolation`: programmer error, surfaced to the caller
//!
//! Scheduler task actions are deliberately outside this taxonomy: a panic
//! inside an action unwinds out of `TickScheduler::advance` to the host.

use replica_env::{EnvError, KindId};
use thiserror::Error;

/// Errors raised by the replication core.
#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    
    #[error("Transport error: {0}")]
    Transport(#[from] EnvError),
    
    #[error("Decode error for kind '{kind}': {reason}")]
    Decode { kind: KindId, reason: String },
    
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl ReplicaError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
    
    pub fn decode(kind: &KindId, reason: impl std::fmt::Display) -> Self {
        Self::Decode {
            kind: kind.clone(),
            reason: reason.to_string(),
        }
    }
    
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }
    
    /// True for errors the tick loop isolates and keeps going after.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Decode { .. })
    }
}

/// Codec failures (encode or decode of one object's state).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Encode failed: {0}")]
    Encode(String),
    
    #[error("Decode failed: {0}")]
    Decode(String),
}

impl CodecError {
    pub fn encode(err: impl std::fmt::Display) -> Self {
        Self::Encode(err.to_string())
    }
    
    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_recoverable_classification() {
        assert!(ReplicaError::from(EnvError::TransportClosed).is_recoverable());
        assert!(ReplicaError::decode(&KindId::from("flare"), "truncated").is_recoverable());
        assert!(!ReplicaError::configuration("no codec").is_recoverable());
        assert!(!ReplicaError::invariant("duplicate id").is_recoverable());
    }
    
    #[test]
    fn test_decode_error_names_kind() {
        let err = ReplicaError::decode(&KindId::from("flare"), "bad json");
        assert_eq!(err.to_string(), "Decode error for kind 'flare': bad json");
    }
}

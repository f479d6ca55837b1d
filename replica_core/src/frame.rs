//! Replication wire frame.
//!
//! Every event sent to an observer is one `ReplicationEvent`, framed as
//! JSON. The object state inside Spawn/Sync is already encoded by the
//! kind's codec and travels as opaque bytes.

use crate::error::CodecError;
use replica_env::{KindId, ObjectId};
use serde::{Deserialize, Serialize};

/// What happened to an object from one observer's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplicationAction {
    /// Object entered the observer's range; full state snapshot
    Spawn { state: Vec<u8> },
    
    /// Object changed while visible; full state snapshot
    Sync { state: Vec<u8> },
    
    /// Object left range or was destroyed
    Remove,
}

impl ReplicationAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn",
            Self::Sync { .. } => "sync",
            Self::Remove => "remove",
        }
    }
}

/// One replication event addressed to one observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationEvent {
    pub kind: KindId,
    pub object: ObjectId,
    
    /// Server tick the event was produced on
    pub tick: u64,
    
    pub action: ReplicationAction,
}

impl ReplicationEvent {
    pub fn new(kind: KindId, object: ObjectId, tick: u64, action: ReplicationAction) -> Self {
        Self { kind, object, tick, action }
    }
    
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(CodecError::encode)
    }
    
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::decode)
    }
}

//! Common types for the replica environment abstraction.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Spreads a 64-bit seed over 16 bytes for deterministic UUIDs.
fn seeded_bytes(seed: u64, salt: u64) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    bytes[0..8].copy_from_slice(&seed.to_le_bytes());
    bytes[8..16].copy_from_slice(&(seed ^ salt).wrapping_mul(0x517cc1b727220a95).to_le_bytes());
    bytes
}

/// Unique identifier for a remote observer (a connected client/viewpoint).
///
/// Uses UUID v4 for global uniqueness without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObserverId(pub Uuid);

impl ObserverId {
    /// Creates a new random ObserverId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
    
    /// Creates a deterministic ObserverId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        Self(Uuid::from_bytes(seeded_bytes(seed, 0x0b5e_7e7e)))
    }
    
    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Unique identifier for a managed object.
///
/// The same id names the authoritative copy on the server and every
/// replicated copy in client views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub Uuid);

impl ObjectId {
    /// Creates a new random ObjectId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
    
    /// Creates a deterministic ObjectId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        Self(Uuid::from_bytes(seeded_bytes(seed, 0x0b1e_c7)))
    }
    
    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Identifier of a managed-object kind ("flare", "beacon", ...).
///
/// Kinds are registered explicitly at startup; the id travels in every
/// replication frame so the receiving side can route it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KindId(pub String);

impl KindId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
    
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for KindId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl std::fmt::Display for KindId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An observer together with its last known position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObserverSnapshot {
    /// Observer identity
    pub id: ObserverId,
    
    /// World position [x, y, z]
    pub position: Point3<f64>,
}

impl ObserverSnapshot {
    pub fn new(id: ObserverId, position: Point3<f64>) -> Self {
        Self { id, position }
    }
    
    /// Euclidean distance from this observer to a point.
    pub fn distance_to(&self, point: &Point3<f64>) -> f64 {
        nalgebra::distance(&self.position, point)
    }
}

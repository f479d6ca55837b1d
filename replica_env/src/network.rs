//! Transport and observer-directory abstractions.

use crate::error::EnvError;
use crate::types::{ObserverId, ObserverSnapshot};
use nalgebra::Point3;

/// Abstraction for delivering replication payloads to observers.
///
/// # Implementations
///
/// - **Production**: `ChannelTransport` (tokio channels feeding per-observer writers)
/// - **Simulation**: `SimTransport` with configurable loss and unreachable observers
///
/// # Delivery
///
/// ```text
/// Replicator                 Transport                  Observer
///   |                           |                          |
///   |-- send(obs, bytes) ------>|                          |
///   |<-- Ok / Err (logged) -----|-- [best effort] -------->|
/// ```
///
/// `send` must not block: it is called from inside the tick. Success means
/// the payload was queued, not that it arrived.
pub trait ObserverTransport: Send + Sync + 'static {
    /// Queues a payload for one observer.
    ///
    /// # Returns
    /// * `Ok(())` - Payload queued for delivery
    /// * `Err(EnvError::ObserverUnreachable)` - Observer unknown or its link is gone
    fn send(&self, observer: ObserverId, payload: Vec<u8>) -> Result<(), EnvError>;
}

/// Answers "which observers are near this point?".
///
/// Called once per reconcile tick by the host.
pub trait ObserverDirectory: Send + Sync + 'static {
    /// Returns observers within `max_range` of `point`, in a stable order.
    ///
    /// `None` means unbounded.
    fn enumerate_near(&self, point: &Point3<f64>, max_range: Option<f64>) -> Vec<ObserverSnapshot>;
}

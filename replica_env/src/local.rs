//! In-process implementations with no I/O behind them.

use crate::context::TickClock;
use crate::network::ObserverDirectory;
use crate::types::{ObserverId, ObserverSnapshot};
use dashmap::DashMap;
use nalgebra::Point3;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A tick clock advanced explicitly by its owner.
///
/// Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    tick: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }
    
    /// Advances by one tick and returns the new tick.
    pub fn advance(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::SeqCst) + 1
    }
    
    /// Jumps to a specific tick.
    pub fn set(&self, tick: u64) {
        self.tick.store(tick, Ordering::SeqCst);
    }
}

impl TickClock for ManualClock {
    fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::SeqCst)
    }
}

/// Observer directory whose positions are pushed in by the host.
///
/// Enumeration is a linear distance check; results are sorted by id so
/// the order is stable from tick to tick.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    positions: DashMap<ObserverId, Point3<f64>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }
    
    /// Inserts or moves an observer.
    pub fn upsert(&self, id: ObserverId, position: Point3<f64>) {
        self.positions.insert(id, position);
    }
    
    /// Removes an observer; returns its last position.
    pub fn remove(&self, id: &ObserverId) -> Option<Point3<f64>> {
        self.positions.remove(id).map(|(_, p)| p)
    }
    
    pub fn len(&self) -> usize {
        self.positions.len()
    }
    
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl ObserverDirectory for StaticDirectory {
    fn enumerate_near(&self, point: &Point3<f64>, max_range: Option<f64>) -> Vec<ObserverSnapshot> {
        let mut near: Vec<ObserverSnapshot> = self
            .positions
            .iter()
            .map(|entry| ObserverSnapshot::new(*entry.key(), *entry.value()))
            .filter(|snap| max_range.map_or(true, |r| snap.distance_to(point) <= r))
            .collect();
        near.sort_by_key(|snap| snap.id);
        near
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new();
        let other = clock.clone();
        
        assert_eq!(clock.advance(), 1);
        assert_eq!(clock.advance(), 2);
        assert_eq!(other.current_tick(), 2);
        
        other.set(10);
        assert_eq!(clock.current_tick(), 10);
    }
    
    #[test]
    fn test_static_directory_filters_by_range() {
        let dir = StaticDirectory::new();
        let near = ObserverId::from_seed(1);
        let far = ObserverId::from_seed(2);
        dir.upsert(near, Point3::new(10.0, 0.0, 0.0));
        dir.upsert(far, Point3::new(500.0, 0.0, 0.0));
        
        let found = dir.enumerate_near(&Point3::origin(), Some(100.0));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, near);
        
        assert_eq!(dir.enumerate_near(&Point3::origin(), None).len(), 2);
    }
    
    #[test]
    fn test_static_directory_order_is_stable() {
        let dir = StaticDirectory::new();
        for seed in 0..16 {
            dir.upsert(ObserverId::from_seed(seed), Point3::origin());
        }
        
        let first: Vec<_> = dir.enumerate_near(&Point3::origin(), None).iter().map(|s| s.id).collect();
        let second: Vec<_> = dir.enumerate_near(&Point3::origin(), None).iter().map(|s| s.id).collect();
        assert_eq!(first, second);
        assert!(first.windows(2).all(|w| w[0] < w[1]));
    }
    
    #[test]
    fn test_static_directory_remove() {
        let dir = StaticDirectory::new();
        let id = ObserverId::from_seed(1);
        dir.upsert(id, Point3::new(1.0, 2.0, 3.0));
        
        assert_eq!(dir.remove(&id), Some(Point3::new(1.0, 2.0, 3.0)));
        assert!(dir.is_empty());
    }
}

//! Simulated observer directory.

use nalgebra::{distance, Point3};
use replica_env::{ObserverDirectory, ObserverId, ObserverSnapshot};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// In-memory observer positions, enumerated in join order.
///
/// Counts queries so scenarios can check the host asks once per tick.
#[derive(Debug, Default)]
pub struct SimDirectory {
    observers: Mutex<Vec<(ObserverId, Point3<f64>)>>,
    queries: AtomicU64,
}

impl SimDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observer, or moves it if already present (keeping its slot).
    pub fn place(&self, id: ObserverId, position: Point3<f64>) {
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        match observers.iter_mut().find(|(observer, _)| *observer == id) {
            Some(slot) => slot.1 = position,
            None => observers.push((id, position)),
        }
    }

    pub fn remove(&self, id: &ObserverId) -> bool {
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(observer, _)| observer != id);
        observers.len() != before
    }

    pub fn position(&self, id: &ObserverId) -> Option<Point3<f64>> {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(observer, _)| observer == id)
            .map(|(_, position)| *position)
    }

    pub fn len(&self) -> usize {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `enumerate_near` calls so far.
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }
}

impl ObserverDirectory for SimDirectory {
    fn enumerate_near(&self, point: &Point3<f64>, max_range: Option<f64>) -> Vec<ObserverSnapshot> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, position)| max_range.map_or(true, |range| distance(point, position) <= range))
            .map(|(id, position)| ObserverSnapshot::new(*id, *position))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumeration_keeps_join_order() {
        let directory = SimDirectory::new();
        let ids: Vec<_> = [9, 2, 5].into_iter().map(ObserverId::from_seed).collect();
        for (i, id) in ids.iter().enumerate() {
            directory.place(*id, Point3::new(i as f64, 0.0, 0.0));
        }

        // Moving keeps the slot
        directory.place(ids[0], Point3::new(3.0, 0.0, 0.0));

        let seen: Vec<_> = directory
            .enumerate_near(&Point3::origin(), None)
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(seen, ids);
        assert_eq!(directory.queries(), 1);
    }

    #[test]
    fn test_range_filter() {
        let directory = SimDirectory::new();
        directory.place(ObserverId::from_seed(1), Point3::new(10.0, 0.0, 0.0));
        directory.place(ObserverId::from_seed(2), Point3::new(100.0, 0.0, 0.0));

        let near = directory.enumerate_near(&Point3::origin(), Some(50.0));
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].id, ObserverId::from_seed(1));

        assert!(directory.remove(&ObserverId::from_seed(1)));
        assert!(directory.enumerate_near(&Point3::origin(), Some(50.0)).is_empty());
        assert_eq!(directory.len(), 1);
    }
}

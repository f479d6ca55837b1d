//! Demo object kinds replicated by the simulator.
//!
//! - `Beacon`: a static marker, changed only when a scenario moves or relabels it
//! - `Flare`: rises along a path motion, fades through an animation chain, then expires

use nalgebra::Point3;
use replica_core::{
    AnimationChain, KindDescriptor, ObjectKind, ReplicaError, RepeatNode, Teleport, TickOutcome, WaitNode,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub const BEACON: &str = "beacon";
pub const FLARE: &str = "flare";

/// Full brightness, in per-mille.
const FULL: u32 = 1000;

// =============================================================================
// BEACON
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beacon {
    pub position: [f64; 3],
    pub label: String,

    /// Own visibility range; `None` uses the kind default
    pub range: Option<f64>,
}

impl Beacon {
    pub fn new(label: impl Into<String>, position: Point3<f64>) -> Self {
        Self {
            position: [position.x, position.y, position.z],
            label: label.into(),
            range: None,
        }
    }

    pub fn with_range(mut self, range: f64) -> Self {
        self.range = Some(range);
        self
    }
}

impl ObjectKind for Beacon {
    fn tick(&mut self) -> TickOutcome {
        TickOutcome::Unchanged
    }

    fn position(&self) -> Point3<f64> {
        Point3::from(self.position)
    }

    fn view_range(&self) -> Option<f64> {
        self.range
    }
}

impl Teleport for Beacon {
    fn teleport(&mut self, position: Point3<f64>) {
        self.position = [position.x, position.y, position.z];
    }
}

pub fn beacon_descriptor() -> Result<KindDescriptor<Beacon>, ReplicaError> {
    KindDescriptor::<Beacon>::builder(BEACON).json().build()
}

// =============================================================================
// FLARE
// =============================================================================

/// Server-only fade state; never replicated.
#[derive(Default)]
struct FlareFade {
    chain: AnimationChain,

    /// Brightness written by the chain, in per-mille
    level: Arc<AtomicU32>,
}

/// A firework flare.
///
/// The authoritative copy owns a chain `[wait rise_ticks] -> [fade over
/// fade_ticks]`; when the chain is done the flare reports `Finished`.
/// Replicated copies carry only position and brightness.
#[derive(Serialize, Deserialize)]
pub struct Flare {
    pub position: [f64; 3],

    /// 0.0 (dark) to 1.0 (full)
    pub brightness: f64,

    #[serde(skip)]
    fade: FlareFade,
}

impl Flare {
    pub fn launch(position: Point3<f64>, rise_ticks: u32, fade_ticks: u32) -> Self {
        let level = Arc::new(AtomicU32::new(FULL));
        let steps = fade_ticks.max(1);
        let writer = Arc::clone(&level);

        let chain = AnimationChain::new()
            .then(WaitNode::new(rise_ticks), 0)
            .then(
                RepeatNode::new(steps, move |step| {
                    let remaining = steps - step - 1;
                    writer.store(FULL * remaining / steps, Ordering::SeqCst);
                }),
                0,
            );

        Self {
            position: [position.x, position.y, position.z],
            brightness: 1.0,
            fade: FlareFade { chain, level },
        }
    }

    /// Ticks a flare needs from launch until it reports `Finished`.
    pub fn lifetime(rise_ticks: u32, fade_ticks: u32) -> u32 {
        rise_ticks.max(1) + fade_ticks.max(1)
    }
}

impl std::fmt::Debug for Flare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flare")
            .field("position", &self.position)
            .field("brightness", &self.brightness)
            .field("fading", &self.fade.chain.current_index())
            .finish()
    }
}

impl ObjectKind for Flare {
    fn tick(&mut self) -> TickOutcome {
        let chain = &mut self.fade.chain;
        if !chain.is_running() && !chain.is_done() {
            chain.start();
        }
        chain.tick();

        if chain.is_done() {
            return TickOutcome::Finished;
        }

        let brightness = self.fade.level.load(Ordering::SeqCst) as f64 / FULL as f64;
        if (brightness - self.brightness).abs() > f64::EPSILON {
            self.brightness = brightness;
            TickOutcome::Changed
        } else {
            TickOutcome::Unchanged
        }
    }

    fn position(&self) -> Point3<f64> {
        Point3::from(self.position)
    }
}

impl Teleport for Flare {
    fn teleport(&mut self, position: Point3<f64>) {
        self.position = [position.x, position.y, position.z];
    }
}

pub fn flare_descriptor() -> Result<KindDescriptor<Flare>, ReplicaError> {
    KindDescriptor::<Flare>::builder(FLARE).json().default_view_range(96.0).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_core::Codec;

    #[test]
    fn test_flare_fades_then_finishes() {
        let mut flare = Flare::launch(Point3::origin(), 3, 4);
        let mut outcomes = Vec::new();
        for _ in 0..20 {
            let outcome = flare.tick();
            outcomes.push(outcome);
            if outcome == TickOutcome::Finished {
                break;
            }
        }

        assert_eq!(outcomes.last(), Some(&TickOutcome::Finished));
        assert_eq!(outcomes.len() as u32, Flare::lifetime(3, 4));
        let changes = outcomes.iter().filter(|o| **o == TickOutcome::Changed).count();
        assert_eq!(changes, 3);
    }

    #[test]
    fn test_replicated_flare_carries_visible_state_only() {
        let descriptor = flare_descriptor().unwrap();
        let flare = Flare::launch(Point3::new(1.0, 2.0, 3.0), 5, 5);

        let bytes = descriptor.codec().encode(&flare).unwrap();
        let mut copy = descriptor.codec().decode(&bytes).unwrap();
        assert_eq!(copy.position, [1.0, 2.0, 3.0]);
        assert_eq!(copy.brightness, 1.0);

        // A replicated copy has no chain and never finishes on its own.
        assert_eq!(copy.client_tick(), TickOutcome::Unchanged);
    }

    #[test]
    fn test_beacon_descriptor() {
        let descriptor = beacon_descriptor().unwrap();
        assert_eq!(descriptor.kind().as_str(), BEACON);
        let beacon = Beacon::new("north", Point3::new(0.0, 0.0, 10.0)).with_range(12.0);
        assert_eq!(beacon.view_range(), Some(12.0));
    }
}

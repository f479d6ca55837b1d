//! Path motion - per-tick displacement of a target along a pure path.
//!
//! Each motion keeps its origin and a tick counter. Every tick it computes
//! `origin + displacement(tick)` and teleports the target there. The
//! displacement function only sees the tick counter, so the same counter
//! always yields the same position (replay and tests rely on this).
//!
//! A motion is dropped the first tick its validity check fails, before
//! anything is applied on that tick.

use nalgebra::{Point3, Vector3};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Pure displacement from the origin as a function of the motion's tick.
pub type DisplacementFn = Box<dyn Fn(u64) -> Vector3<f64> + Send>;

/// Something a path motion can move.
pub trait MotionTarget: Send + Sync {
    /// False once the target is gone (e.g. its object was cancelled).
    fn is_valid(&self) -> bool;

    /// Moves the target to an absolute position.
    fn teleport(&self, position: Point3<f64>);
}

/// Cancels a registered motion from outside the registry.
#[derive(Debug, Clone, Default)]
pub struct MotionHandle {
    cancelled: Arc<AtomicBool>,
}

impl MotionHandle {
    /// Takes effect on the registry's next tick.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A registered path: origin, tick counter, target and displacement.
pub struct PathMotion {
    origin: Point3<f64>,
    tick: u64,
    target: Arc<dyn MotionTarget>,
    displacement: DisplacementFn,
    handle: MotionHandle,
}

impl PathMotion {
    pub fn new<D>(origin: Point3<f64>, target: Arc<dyn MotionTarget>, displacement: D) -> Self
    where
        D: Fn(u64) -> Vector3<f64> + Send + 'static,
    {
        Self {
            origin,
            tick: 0,
            target,
            displacement: Box::new(displacement),
            handle: MotionHandle::default(),
        }
    }

    /// Starts the path at `tick` instead of zero.
    pub fn starting_at(mut self, tick: u64) -> Self {
        self.tick = tick;
        self
    }

    pub fn handle(&self) -> MotionHandle {
        self.handle.clone()
    }

    pub fn origin(&self) -> Point3<f64> {
        self.origin
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Position the path yields for a given tick.
    pub fn position_at(&self, tick: u64) -> Point3<f64> {
        self.origin + (self.displacement)(tick)
    }

    fn is_valid(&self) -> bool {
        !self.handle.is_cancelled() && self.target.is_valid()
    }

    fn step(&mut self) {
        let position = self.position_at(self.tick);
        self.tick += 1;
        self.target.teleport(position);
    }
}

/// All active path motions. Ticked on the tick thread only.
#[derive(Default)]
pub struct PathMotionRegistry {
    motions: Vec<PathMotion>,
}

impl PathMotionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a motion; it is first applied on the next `tick()`.
    pub fn apply(&mut self, motion: PathMotion) -> MotionHandle {
        let handle = motion.handle();
        self.motions.push(motion);
        handle
    }

    /// Applies every valid motion once and drops the invalid ones.
    pub fn tick(&mut self) {
        let before = self.motions.len();
        self.motions.retain_mut(|motion| {
            if !motion.is_valid() {
                return false;
            }
            motion.step();
            true
        });

        let dropped = before - self.motions.len();
        if dropped > 0 {
            trace!(dropped, remaining = self.motions.len(), "Path motions expired");
        }
    }

    pub fn len(&self) -> usize {
        self.motions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.motions.is_empty()
    }

    pub fn clear(&mut self) {
        self.motions.clear();
    }
}

/// Ready-made pure displacement functions.
pub mod displacement {
    use nalgebra::Vector3;
    use std::f64::consts::TAU;

    /// Constant velocity, in units per tick.
    pub fn linear(velocity: Vector3<f64>) -> impl Fn(u64) -> Vector3<f64> + Send + 'static {
        move |tick| velocity * tick as f64
    }

    /// Circle in the XZ plane starting at `(radius, 0, 0)`, one lap per `period` ticks.
    pub fn circle(radius: f64, period: u64) -> impl Fn(u64) -> Vector3<f64> + Send + 'static {
        let period = period.max(1) as f64;
        move |tick| {
            let angle = TAU * tick as f64 / period;
            Vector3::new(radius * angle.cos(), 0.0, radius * angle.sin())
        }
    }

    /// Projectile arc: initial velocity plus constant acceleration, per tick.
    pub fn ballistic(
        velocity: Vector3<f64>,
        gravity: Vector3<f64>,
    ) -> impl Fn(u64) -> Vector3<f64> + Send + 'static {
        move |tick| {
            let t = tick as f64;
            velocity * t + gravity * (0.5 * t * t)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Dummy {
        valid: AtomicBool,
        positions: Mutex<Vec<Point3<f64>>>,
    }

    impl Dummy {
        fn alive() -> Arc<Self> {
            let dummy = Self::default();
            dummy.valid.store(true, Ordering::SeqCst);
            Arc::new(dummy)
        }

        fn positions(&self) -> Vec<Point3<f64>> {
            self.positions.lock().unwrap().clone()
        }
    }

    impl MotionTarget for Dummy {
        fn is_valid(&self) -> bool {
            self.valid.load(Ordering::SeqCst)
        }

        fn teleport(&self, position: Point3<f64>) {
            self.positions.lock().unwrap().push(position);
        }
    }

    #[test]
    fn test_linear_motion_applies_each_tick() {
        let target = Dummy::alive();
        let mut registry = PathMotionRegistry::new();
        registry.apply(PathMotion::new(
            Point3::new(10.0, 0.0, 0.0),
            target.clone(),
            displacement::linear(Vector3::new(1.0, 2.0, 0.0)),
        ));

        registry.tick();
        registry.tick();
        registry.tick();

        assert_eq!(
            target.positions(),
            vec![
                Point3::new(10.0, 0.0, 0.0),
                Point3::new(11.0, 2.0, 0.0),
                Point3::new(12.0, 4.0, 0.0),
            ]
        );
    }

    #[test]
    fn test_invalid_target_not_applied_and_removed() {
        let target = Dummy::alive();
        let mut registry = PathMotionRegistry::new();
        registry.apply(PathMotion::new(
            Point3::origin(),
            target.clone(),
            displacement::linear(Vector3::x()),
        ));

        registry.tick();
        assert_eq!(target.positions().len(), 1);

        target.valid.store(false, Ordering::SeqCst);
        registry.tick();
        assert_eq!(target.positions().len(), 1);
        assert!(registry.is_empty());

        target.valid.store(true, Ordering::SeqCst);
        registry.tick();
        assert_eq!(target.positions().len(), 1);
    }

    #[test]
    fn test_handle_cancel() {
        let target = Dummy::alive();
        let mut registry = PathMotionRegistry::new();
        let handle = registry.apply(PathMotion::new(
            Point3::origin(),
            target.clone(),
            displacement::linear(Vector3::x()),
        ));
        let keep = registry.apply(PathMotion::new(
            Point3::origin(),
            Dummy::alive(),
            displacement::linear(Vector3::y()),
        ));

        handle.cancel();
        registry.tick();
        assert!(target.positions().is_empty());
        assert_eq!(registry.len(), 1);
        assert!(!keep.is_cancelled());
    }

    #[test]
    fn test_displacement_is_pure() {
        let motion = PathMotion::new(
            Point3::new(1.0, 1.0, 1.0),
            Dummy::alive(),
            displacement::ballistic(Vector3::new(0.0, 4.0, 0.0), Vector3::new(0.0, -1.0, 0.0)),
        );

        for tick in [0, 3, 7, 3, 0] {
            assert_eq!(motion.position_at(tick), motion.position_at(tick));
        }
        assert_relative_eq!(motion.position_at(4).y, 1.0 + 16.0 - 8.0);
    }

    #[test]
    fn test_circle_returns_to_start() {
        let path = displacement::circle(5.0, 40);
        let start = path(0);
        let lap = path(40);
        assert_relative_eq!(start.x, 5.0);
        assert_relative_eq!(lap.x, start.x, epsilon = 1e-9);
        assert_relative_eq!(lap.z, start.z, epsilon = 1e-9);
        assert_relative_eq!(path(10).z, 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_starting_at_offsets_counter() {
        let target = Dummy::alive();
        let mut registry = PathMotionRegistry::new();
        registry.apply(
            PathMotion::new(Point3::origin(), target.clone(), displacement::linear(Vector3::x()))
                .starting_at(5),
        );

        registry.tick();
        assert_eq!(target.positions(), vec![Point3::new(5.0, 0.0, 0.0)]);
    }

    #[test]
    fn test_counter_runs_past_u32_range() {
        let target = Dummy::alive();
        let start = u64::from(u32::MAX);
        let mut registry = PathMotionRegistry::new();
        registry.apply(
            PathMotion::new(Point3::origin(), target.clone(), displacement::linear(Vector3::x()))
                .starting_at(start),
        );

        registry.tick();
        registry.tick();
        let xs: Vec<f64> = target.positions().iter().map(|p| p.x).collect();
        assert_relative_eq!(xs[0], start as f64);
        assert_relative_eq!(xs[1], start as f64 + 1.0);
    }
}

//! Ground truth oracle for simulation.
//!
//! The Oracle owns where every simulated observer really is:
//! - True positions and velocities of all walkers
//! - Motion (constant velocity plus seeded Gaussian jitter)
//! - An arena: walkers bounce off its walls
//!
//! The host never sees the Oracle directly; the world copies its
//! positions into the observer directory each tick.

use nalgebra::{Point3, Vector3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use replica_env::ObserverId;
use serde::{Deserialize, Serialize};

/// One simulated observer's ground truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Walker {
    pub id: ObserverId,

    /// Position in world units
    pub position: Point3<f64>,

    /// Velocity in units per second
    pub velocity: Vector3<f64>,
}

/// The Oracle - moves walkers deterministically from a seed.
pub struct Oracle {
    /// RNG for jitter and random placement
    rng: ChaCha8Rng,

    /// Walkers in spawn order
    walkers: Vec<Walker>,

    /// Half-width of the square arena (XZ plane)
    arena: f64,

    /// Per-step position jitter standard deviation
    jitter_std: f64,

    /// Simulated seconds elapsed
    current_time: f64,
}

impl Oracle {
    /// Creates an Oracle with the given physics seed.
    ///
    /// The physics seed should be derived separately from the transport seed
    /// so that changing link faults doesn't change observer trajectories.
    pub fn new(physics_seed: u64, arena: f64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(physics_seed),
            walkers: Vec::new(),
            arena: arena.abs().max(1.0),
            jitter_std: 0.0,
            current_time: 0.0,
        }
    }

    /// Sets the per-step jitter standard deviation (0 disables jitter).
    pub fn set_jitter(&mut self, std_dev: f64) {
        self.jitter_std = std_dev.max(0.0);
    }

    /// Adds a walker at a fixed position and velocity.
    pub fn spawn_walker(&mut self, id: ObserverId, position: Point3<f64>, velocity: Vector3<f64>) {
        self.walkers.push(Walker { id, position, velocity });
    }

    /// Adds a walker at a random position with a random heading at `speed`.
    pub fn spawn_random_walker(&mut self, id: ObserverId, speed: f64) -> Point3<f64> {
        let position = self.random_point();
        let heading: f64 = self.rng.gen_range(0.0..std::f64::consts::TAU);
        let velocity = Vector3::new(heading.cos(), 0.0, heading.sin()) * speed;
        self.spawn_walker(id, position, velocity);
        position
    }

    /// Uniform random point inside the arena (y = 0).
    pub fn random_point(&mut self) -> Point3<f64> {
        let x = self.rng.gen_range(-self.arena..=self.arena);
        let z = self.rng.gen_range(-self.arena..=self.arena);
        Point3::new(x, 0.0, z)
    }

    /// Advances every walker by `dt` seconds.
    pub fn step(&mut self, dt: f64) {
        self.current_time += dt;
        let jitter = Normal::new(0.0, self.jitter_std).ok().filter(|_| self.jitter_std > 0.0);

        for walker in &mut self.walkers {
            walker.position += walker.velocity * dt;
            if let Some(normal) = &jitter {
                walker.position.x += normal.sample(&mut self.rng);
                walker.position.z += normal.sample(&mut self.rng);
            }

            // Bounce off the arena walls
            for axis in [0, 2] {
                if walker.position[axis].abs() > self.arena {
                    walker.position[axis] = walker.position[axis].clamp(-self.arena, self.arena);
                    walker.velocity[axis] = -walker.velocity[axis];
                }
            }
        }
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.current_time
    }

    pub fn walkers(&self) -> &[Walker] {
        &self.walkers
    }

    /// Current ground truth positions, in spawn order.
    pub fn positions(&self) -> Vec<(ObserverId, Point3<f64>)> {
        self.walkers.iter().map(|w| (w.id, w.position)).collect()
    }

    /// Gives a `rand` source to scenarios that need extra seeded choices.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oracle_constant_velocity() {
        let mut oracle = Oracle::new(42, 1000.0);
        let id = ObserverId::from_seed(1);
        oracle.spawn_walker(id, Point3::origin(), Vector3::new(20.0, 0.0, 0.0));

        oracle.step(1.0);

        let walker = &oracle.walkers()[0];
        assert!((walker.position.x - 20.0).abs() < 0.001);
        assert!((oracle.time() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_oracle_bounces_inside_arena() {
        let mut oracle = Oracle::new(42, 10.0);
        oracle.spawn_walker(ObserverId::from_seed(1), Point3::new(9.0, 0.0, 0.0), Vector3::new(5.0, 0.0, 0.0));

        oracle.step(1.0);
        let walker = &oracle.walkers()[0];
        assert_eq!(walker.position.x, 10.0);
        assert!(walker.velocity.x < 0.0);
    }

    #[test]
    fn test_oracle_deterministic_jitter() {
        let run = || {
            let mut oracle = Oracle::new(7, 100.0);
            oracle.set_jitter(0.5);
            oracle.spawn_random_walker(ObserverId::from_seed(1), 3.0);
            for _ in 0..20 {
                oracle.step(0.05);
            }
            oracle.positions()
        };

        // Same seed = same trajectory
        assert_eq!(run(), run());
    }
}

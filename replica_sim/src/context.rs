//! Simulation clock implementing `FrameClock` for deterministic testing.

use async_trait::async_trait;
use replica_env::{FrameClock, TickClock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Virtual frame clock.
///
/// This implements `FrameClock` using:
/// - A tick counter that only moves when a frame is requested
/// - No sleeping: a frame is "due" immediately, after yielding once so other
///   tasks on the runtime get a turn
pub struct SimClock {
    /// Frames started so far (shared between clones)
    tick: Arc<AtomicU64>,

    /// Nominal rate, used to convert ticks to virtual seconds
    tick_rate_hz: u32,
}

impl SimClock {
    /// Creates a clock at tick 0.
    pub fn new(tick_rate_hz: u32) -> Self {
        Self {
            tick: Arc::new(AtomicU64::new(0)),
            tick_rate_hz: tick_rate_hz.max(1),
        }
    }

    /// Creates an Arc-wrapped clock for sharing.
    pub fn shared(tick_rate_hz: u32) -> Arc<Self> {
        Arc::new(Self::new(tick_rate_hz))
    }

    /// Starts the next frame and returns its tick.
    pub fn advance(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Virtual seconds elapsed at the current tick.
    pub fn elapsed_secs(&self) -> f64 {
        self.current_tick() as f64 / self.tick_rate_hz as f64
    }
}

impl Clone for SimClock {
    fn clone(&self) -> Self {
        Self {
            tick: Arc::clone(&self.tick),
            tick_rate_hz: self.tick_rate_hz,
        }
    }
}

impl TickClock for SimClock {
    fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameClock for SimClock {
    async fn next_frame(&self) -> u64 {
        tokio::task::yield_now().await;
        self.advance()
    }

    fn tick_rate_hz(&self) -> u32 {
        self.tick_rate_hz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_clock_advance() {
        let clock = SimClock::new(20);
        assert_eq!(clock.current_tick(), 0);

        assert_eq!(clock.advance(), 1);
        assert_eq!(clock.advance(), 2);
        assert_eq!(clock.current_tick(), 2);
        assert!((clock.elapsed_secs() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_sim_clock_clone_shares_tick() {
        let a = SimClock::new(20);
        let b = a.clone();

        a.advance();
        a.advance();

        // Both should see the same tick
        assert_eq!(b.current_tick(), 2);
    }

    #[tokio::test]
    async fn test_next_frame_never_sleeps() {
        let clock = SimClock::new(1);
        let start = std::time::Instant::now();

        for expected in 1..=50 {
            assert_eq!(clock.next_frame().await, expected);
        }

        // 50 frames at 1 Hz would take 50s of wall time if it slept
        assert!(start.elapsed() < std::time::Duration::from_secs(5));
        assert_eq!(clock.tick_rate_hz(), 1);
    }
}

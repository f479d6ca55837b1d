//! Clock traits for the replica runtime.

use async_trait::async_trait;

/// Reports the current logical tick.
///
/// The tick is monotonically increasing and is used only to stamp
/// replication frames and log lines. Scheduling inside the core is purely
/// countdown based and never reads this value.
pub trait TickClock: Send + Sync + 'static {
    /// Returns the current logical tick.
    fn current_tick(&self) -> u64;
}

/// A fixed-rate frame source for the host loop.
///
/// # Implementations
///
/// - **Production**: `TokioFrameClock` - wraps `tokio::time::interval`
/// - **Simulation**: `SimClock` - advances a virtual tick without sleeping
///
/// Only the host loop awaits this; every core operation inside a frame is
/// synchronous.
#[async_trait]
pub trait FrameClock: TickClock {
    /// Suspends until the next frame boundary, then advances the tick.
    ///
    /// Returns the tick of the frame that is about to run.
    async fn next_frame(&self) -> u64;
    
    /// Frame rate in Hz (for logging).
    fn tick_rate_hz(&self) -> u32;
}

//! Production implementations backed by Tokio.

use crate::context::{FrameClock, TickClock};
use crate::error::EnvError;
use crate::network::ObserverTransport;
use crate::types::ObserverId;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};

/// Fixed-rate frame clock backed by `tokio::time::interval`.
///
/// Missed frames are skipped rather than replayed in a burst, so a stalled
/// host resumes at the normal cadence instead of running catch-up ticks.
/// Must be created from within a Tokio runtime.
pub struct TokioFrameClock {
    /// Frame interval (behind tokio mutex for async)
    interval: tokio::sync::Mutex<Interval>,
    
    /// Frames started so far
    tick: AtomicU64,
    
    /// Configured rate
    tick_rate_hz: u32,
}

impl TokioFrameClock {
    /// Creates a clock ticking at `tick_rate_hz` (clamped to at least 1 Hz).
    pub fn new(tick_rate_hz: u32) -> Self {
        let hz = tick_rate_hz.max(1);
        let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / hz as f64));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        
        Self {
            interval: tokio::sync::Mutex::new(interval),
            tick: AtomicU64::new(0),
            tick_rate_hz: hz,
        }
    }
    
    /// Creates an Arc-wrapped clock for sharing across tasks.
    pub fn shared(tick_rate_hz: u32) -> Arc<Self> {
        Arc::new(Self::new(tick_rate_hz))
    }
}

impl TickClock for TokioFrameClock {
    fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameClock for TokioFrameClock {
    async fn next_frame(&self) -> u64 {
        self.interval.lock().await.tick().await;
        self.tick.fetch_add(1, Ordering::SeqCst) + 1
    }
    
    fn tick_rate_hz(&self) -> u32 {
        self.tick_rate_hz
    }
}

/// Transport that hands payloads to per-observer Tokio channels.
///
/// A connection task owns the receiving end and writes to the real socket;
/// the tick thread only ever does a non-blocking unbounded send.
#[derive(Default)]
pub struct ChannelTransport {
    peers: DashMap<ObserverId, mpsc::UnboundedSender<Vec<u8>>>,
    closed: AtomicBool,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }
    
    /// Registers an observer and returns the stream of payloads for it.
    ///
    /// Reconnecting replaces (and thereby closes) the previous channel.
    ///
    /// After `close()` the receiver is returned already closed.
    pub fn connect(&self, observer: ObserverId) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.is_closed() {
            self.peers.insert(observer, tx);
        }
        rx
    }
    
    /// Drops an observer's channel.
    pub fn disconnect(&self, observer: &ObserverId) -> bool {
        self.peers.remove(observer).is_some()
    }
    
    /// Number of connected observers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
    
    /// Shuts the transport down: every receiver ends and later sends fail
    /// with `TransportClosed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.peers.clear();
    }
    
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ObserverTransport for ChannelTransport {
    fn send(&self, observer: ObserverId, payload: Vec<u8>) -> Result<(), EnvError> {
        if self.is_closed() {
            return Err(EnvError::TransportClosed);
        }
        let peer = self
            .peers
            .get(&observer)
            .ok_or_else(|| EnvError::unreachable(observer))?;
        
        peer.send(payload).map_err(|_| EnvError::unreachable(observer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[tokio::test]
    async fn test_frame_clock_advances() {
        let clock = TokioFrameClock::new(200);
        assert_eq!(clock.current_tick(), 0);
        
        assert_eq!(clock.next_frame().await, 1);
        assert_eq!(clock.next_frame().await, 2);
        assert_eq!(clock.current_tick(), 2);
    }
    
    #[tokio::test]
    async fn test_frame_clock_clamps_rate() {
        let clock = TokioFrameClock::new(0);
        assert_eq!(clock.tick_rate_hz(), 1);
    }
    
    #[tokio::test]
    async fn test_channel_transport_delivery() {
        let transport = ChannelTransport::new();
        let observer = ObserverId::from_seed(1);
        let mut rx = transport.connect(observer);
        
        transport.send(observer, vec![1, 2, 3]).unwrap();
        assert_eq!(rx.recv().await, Some(vec![1, 2, 3]));
    }
    
    #[test]
    fn test_channel_transport_unknown_observer() {
        let transport = ChannelTransport::new();
        let result = transport.send(ObserverId::from_seed(9), vec![0]);
        assert!(matches!(result, Err(EnvError::ObserverUnreachable(_))));
    }
    
    #[test]
    fn test_channel_transport_closed_receiver() {
        let transport = ChannelTransport::new();
        let observer = ObserverId::from_seed(1);
        let rx = transport.connect(observer);
        drop(rx);
        
        assert!(transport.send(observer, vec![0]).is_err());
        assert!(transport.disconnect(&observer));
        assert_eq!(transport.peer_count(), 0);
    }
    
    #[tokio::test]
    async fn test_close_ends_receivers_and_rejects_sends() {
        let transport = ChannelTransport::new();
        let observer = ObserverId::from_seed(1);
        let mut rx = transport.connect(observer);
        
        transport.close();
        assert!(transport.is_closed());
        assert_eq!(transport.peer_count(), 0);
        assert_eq!(rx.recv().await, None);
        assert!(matches!(transport.send(observer, vec![0]), Err(EnvError::TransportClosed)));
        
        let mut late = transport.connect(ObserverId::from_seed(2));
        assert_eq!(late.recv().await, None);
        assert_eq!(transport.peer_count(), 0);
    }
}

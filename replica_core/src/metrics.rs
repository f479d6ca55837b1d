//! Replication Metrics
//! ===================
//!
//! Operator-facing counters for the replication core:
//! - **Events**: Spawn / Sync / Remove handed to the transport
//! - **Failures**: rejected sends, undecodable inbound frames, unencodable state
//! - **Lifecycle**: ticks run, objects reaped
//!
//! Counters are plain atomics so producer threads (inbound frames) and the
//! tick thread can both record without locking.

use crate::interest::ReconcileReport;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live counters, shared between the host and anything that reports to it.
#[derive(Debug, Default)]
pub struct ReplicationMetrics {
    ticks: AtomicU64,
    spawns: AtomicU64,
    syncs: AtomicU64,
    removes: AtomicU64,
    send_failures: AtomicU64,
    decode_failures: AtomicU64,
    encode_failures: AtomicU64,
    reaped: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub spawns: u64,
    pub syncs: u64,
    pub removes: u64,
    pub send_failures: u64,
    pub decode_failures: u64,
    pub encode_failures: u64,
    pub reaped: u64,
}

// =============================================================================
// RECORDING
// =============================================================================

impl ReplicationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconcile(&self, report: &ReconcileReport) {
        self.spawns.fetch_add(report.spawns as u64, Ordering::Relaxed);
        self.syncs.fetch_add(report.syncs as u64, Ordering::Relaxed);
        self.removes.fetch_add(report.removes as u64, Ordering::Relaxed);
        self.send_failures
            .fetch_add(report.failed_sends as u64, Ordering::Relaxed);
        self.encode_failures
            .fetch_add(report.encode_failures as u64, Ordering::Relaxed);
    }

    pub fn record_reaped(&self, count: usize) {
        self.reaped.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    // =========================================================================
    // READING
    // =========================================================================

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            spawns: self.spawns.load(Ordering::Relaxed),
            syncs: self.syncs.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Events handed to the transport.
    pub fn events(&self) -> u64 {
        self.spawns + self.syncs + self.removes
    }

    /// Fraction of sends the transport rejected, in [0, 1].
    pub fn send_failure_rate(&self) -> f64 {
        match self.events() {
            0 => 0.0,
            n => self.send_failures as f64 / n as f64,
        }
    }
}

//! Per-observer session state owned by the host.
//!
//! Holds effects that belong to one observer for a bounded number of ticks,
//! such as a screen shake. Effects are reset explicitly by `expire()` on the
//! tick they run out, never by falling back to a shared default.
//!
//! This is host-side state only and is never replicated. Host code reads
//! `intensity()` when it builds its own per-observer output.

use replica_env::ObserverId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::trace;

/// Screen shake applied to one observer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShakeEffect {
    /// Current strength; overlapping shakes keep the strongest
    pub intensity: f64,

    /// First tick the effect is no longer active
    pub expires_at: u64,
}

#[derive(Debug, Default)]
pub struct ObserverSessions {
    shakes: HashMap<ObserverId, ShakeEffect>,
}

impl ObserverSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts or strengthens a shake lasting `duration_ticks` from `now`.
    pub fn add_shake(&mut self, observer: ObserverId, intensity: f64, duration_ticks: u64, now: u64) {
        let intensity = intensity.max(0.0);
        let expires_at = now.saturating_add(duration_ticks);
        self.shakes
            .entry(observer)
            .and_modify(|shake| {
                if shake.expires_at <= now {
                    *shake = ShakeEffect { intensity, expires_at };
                } else {
                    shake.intensity = shake.intensity.max(intensity);
                    shake.expires_at = shake.expires_at.max(expires_at);
                }
            })
            .or_insert(ShakeEffect { intensity, expires_at });
    }

    /// Active shake strength, zero when none.
    pub fn intensity(&self, observer: &ObserverId, now: u64) -> f64 {
        match self.shakes.get(observer) {
            Some(shake) if shake.expires_at > now => shake.intensity,
            _ => 0.0,
        }
    }

    /// Resets every effect that has run out; returns how many were reset.
    pub fn expire(&mut self, now: u64) -> usize {
        let before = self.shakes.len();
        self.shakes.retain(|observer, shake| {
            let active = shake.expires_at > now;
            if !active {
                trace!(observer = %observer, "Shake expired");
            }
            active
        });
        before - self.shakes.len()
    }

    /// Drops all state for a disconnected observer.
    pub fn forget(&mut self, observer: &ObserverId) {
        self.shakes.remove(observer);
    }

    pub fn active(&self) -> usize {
        self.shakes.len()
    }

    pub fn clear(&mut self) {
        self.shakes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_overlapping_shakes_keep_max_and_extend() {
        let mut sessions = ObserverSessions::new();
        let p = ObserverId::from_seed(1);

        sessions.add_shake(p, 0.5, 10, 0);
        sessions.add_shake(p, 0.2, 20, 5);

        assert_relative_eq!(sessions.intensity(&p, 6), 0.5);
        assert_relative_eq!(sessions.intensity(&p, 24), 0.5);
        assert_relative_eq!(sessions.intensity(&p, 25), 0.0);
    }

    #[test]
    fn test_expire_resets_to_zero() {
        let mut sessions = ObserverSessions::new();
        let p = ObserverId::from_seed(1);
        let q = ObserverId::from_seed(2);
        sessions.add_shake(p, 1.0, 3, 0);
        sessions.add_shake(q, 1.0, 30, 0);

        assert_eq!(sessions.expire(2), 0);
        assert_eq!(sessions.expire(3), 1);
        assert_relative_eq!(sessions.intensity(&p, 3), 0.0);
        assert_eq!(sessions.active(), 1);

        // A fresh shake after expiry does not inherit the old strength.
        sessions.add_shake(p, 0.1, 5, 3);
        assert_relative_eq!(sessions.intensity(&p, 4), 0.1);
    }

    #[test]
    fn test_forget_observer() {
        let mut sessions = ObserverSessions::new();
        let p = ObserverId::from_seed(1);
        sessions.add_shake(p, 1.0, 100, 0);
        sessions.forget(&p);
        assert_relative_eq!(sessions.intensity(&p, 1), 0.0);
        assert_eq!(sessions.active(), 0);
    }
}

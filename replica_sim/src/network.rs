//! Simulated observer transport with fault injection.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use replica_env::{EnvError, ObserverId, ObserverTransport};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

/// What happened to one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queued in the observer's inbox
    Delivered,

    /// Accepted, then silently dropped by the lossy link
    Lost,

    /// Refused: observer unreachable (the sender sees an error)
    Rejected,
}

/// One entry of the wire log: every send attempt, in order.
#[derive(Debug, Clone)]
pub struct WireRecord {
    pub observer: ObserverId,
    pub payload: Vec<u8>,
    pub outcome: SendOutcome,
}

/// Fault injection shared between the scenario and the transport.
///
/// Clones share the same link state.
#[derive(Debug, Clone, Default)]
pub struct SimLinkController {
    /// Observers whose sends fail with `ObserverUnreachable`
    unreachable: Arc<Mutex<HashSet<ObserverId>>>,

    /// Per-observer silent loss rate (0.0 - 1.0)
    loss: Arc<Mutex<HashMap<ObserverId, f64>>>,
}

impl SimLinkController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cuts (or restores) an observer's link.
    pub fn set_unreachable(&self, observer: ObserverId, unreachable: bool) {
        let mut set = self.unreachable.lock().unwrap_or_else(PoisonError::into_inner);
        if unreachable {
            set.insert(observer);
        } else {
            set.remove(&observer);
        }
    }

    /// Sets the silent loss rate for an observer's link.
    pub fn set_loss(&self, observer: ObserverId, loss_rate: f64) {
        let mut losses = self.loss.lock().unwrap_or_else(PoisonError::into_inner);
        losses.insert(observer, loss_rate.clamp(0.0, 1.0));
    }

    /// Restores every link.
    pub fn heal_all(&self) {
        self.unreachable.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.loss.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn is_reachable(&self, observer: &ObserverId) -> bool {
        !self
            .unreachable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(observer)
    }

    /// Gets the loss rate for a link (default 0.0).
    pub fn loss_rate(&self, observer: &ObserverId) -> f64 {
        let losses = self.loss.lock().unwrap_or_else(PoisonError::into_inner);
        *losses.get(observer).unwrap_or(&0.0)
    }
}

/// In-memory transport: per-observer inboxes plus a complete wire log.
pub struct SimTransport {
    links: SimLinkController,

    /// Delivered payloads not yet drained, per observer
    inboxes: Mutex<HashMap<ObserverId, Vec<Vec<u8>>>>,

    /// Every send attempt since the last `take_log`
    log: Mutex<Vec<WireRecord>>,

    /// Loss decisions (seeded, so runs replay exactly)
    rng: Mutex<ChaCha8Rng>,
}

impl SimTransport {
    pub fn new(seed: u64, links: SimLinkController) -> Self {
        Self {
            links,
            inboxes: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    pub fn shared(seed: u64, links: SimLinkController) -> Arc<Self> {
        Arc::new(Self::new(seed, links))
    }

    pub fn links(&self) -> &SimLinkController {
        &self.links
    }

    /// Takes every payload delivered to `observer` so far.
    pub fn drain(&self, observer: &ObserverId) -> Vec<Vec<u8>> {
        self.inboxes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(observer)
            .unwrap_or_default()
    }

    /// Takes the wire log.
    pub fn take_log(&self) -> Vec<WireRecord> {
        std::mem::take(&mut *self.log.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn decide(&self, observer: &ObserverId) -> SendOutcome {
        if !self.links.is_reachable(observer) {
            return SendOutcome::Rejected;
        }
        let loss = self.links.loss_rate(observer);
        if loss > 0.0 {
            let roll: f64 = self.rng.lock().unwrap_or_else(PoisonError::into_inner).gen();
            if roll < loss {
                return SendOutcome::Lost;
            }
        }
        SendOutcome::Delivered
    }
}

impl ObserverTransport for SimTransport {
    fn send(&self, observer: ObserverId, payload: Vec<u8>) -> Result<(), EnvError> {
        let outcome = self.decide(&observer);
        if outcome == SendOutcome::Delivered {
            self.inboxes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(observer)
                .or_default()
                .push(payload.clone());
        }

        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(WireRecord { observer, payload, outcome });

        match outcome {
            SendOutcome::Rejected => Err(EnvError::unreachable(observer)),
            SendOutcome::Delivered | SendOutcome::Lost => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_controller_unreachable() {
        let links = SimLinkController::new();
        let a = ObserverId::from_seed(1);
        let b = ObserverId::from_seed(2);

        // Initially everyone is reachable
        assert!(links.is_reachable(&a));

        links.set_unreachable(a, true);
        assert!(!links.is_reachable(&a));
        assert!(links.is_reachable(&b));

        // Heal
        links.heal_all();
        assert!(links.is_reachable(&a));
    }

    #[test]
    fn test_transport_delivers_and_logs() {
        let links = SimLinkController::new();
        let transport = SimTransport::new(7, links.clone());
        let a = ObserverId::from_seed(1);
        let b = ObserverId::from_seed(2);
        links.set_unreachable(b, true);

        transport.send(a, b"one".to_vec()).unwrap();
        assert!(transport.send(b, b"two".to_vec()).is_err());

        assert_eq!(transport.drain(&a), vec![b"one".to_vec()]);
        assert!(transport.drain(&a).is_empty());
        assert!(transport.drain(&b).is_empty());

        let log = transport.take_log();
        let outcomes: Vec<_> = log.iter().map(|r| r.outcome).collect();
        assert_eq!(outcomes, vec![SendOutcome::Delivered, SendOutcome::Rejected]);
        assert!(transport.take_log().is_empty());
    }

    #[test]
    fn test_loss_is_seeded() {
        let run = |seed| {
            let links = SimLinkController::new();
            let observer = ObserverId::from_seed(1);
            links.set_loss(observer, 0.5);
            let transport = SimTransport::new(seed, links);
            for i in 0..200u32 {
                transport.send(observer, i.to_le_bytes().to_vec()).unwrap();
            }
            transport
                .take_log()
                .iter()
                .map(|r| r.outcome)
                .collect::<Vec<_>>()
        };

        let first = run(42);
        assert_eq!(first, run(42));
        let lost = first.iter().filter(|o| **o == SendOutcome::Lost).count();
        assert!(lost > 50 && lost < 150, "lost {lost} of 200");
    }
}

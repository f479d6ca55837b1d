//! Protocol audit over the wire log.
//!
//! Replays every attempted send (delivered, lost or rejected alike, since
//! the server's visibility state does not depend on delivery) and checks:
//! - at most one event per (object, observer) per tick
//! - Spawn only while not visible; Sync and Remove only while visible
//!
//! The visibility it derives is what every client should hold when no
//! frames were lost, which the world uses for its convergence check.

use replica_core::{ReplicationAction, ReplicationEvent};
use replica_env::{ObjectId, ObserverId};
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Default)]
pub struct ProtocolAudit {
    /// Derived visibility per (object, observer)
    visible: HashMap<(ObjectId, ObserverId), bool>,

    /// Pairs that already had an event on `current_tick`
    this_tick: HashSet<(ObjectId, ObserverId)>,
    current_tick: u64,

    /// Attempted events per observer, by action label
    counts: HashMap<(ObserverId, &'static str), usize>,

    violations: Vec<String>,
}

impl ProtocolAudit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one attempted event.
    pub fn record(&mut self, observer: ObserverId, event: &ReplicationEvent) {
        if event.tick != self.current_tick {
            self.current_tick = event.tick;
            self.this_tick.clear();
        }

        let pair = (event.object, observer);
        if !self.this_tick.insert(pair) {
            self.violations.push(format!(
                "tick {}: second event for object {} / observer {}",
                event.tick, event.object, observer
            ));
        }

        let label = event.action.label();
        *self.counts.entry((observer, label)).or_default() += 1;

        let visible = self.visible.entry(pair).or_insert(false);
        match (&event.action, *visible) {
            (ReplicationAction::Spawn { .. }, false) => *visible = true,
            (ReplicationAction::Sync { .. }, true) => {}
            (ReplicationAction::Remove, true) => *visible = false,
            (action, was_visible) => self.violations.push(format!(
                "tick {}: {} for object {} / observer {} while {}",
                event.tick,
                action.label(),
                event.object,
                observer,
                if was_visible { "visible" } else { "not visible" }
            )),
        }
    }

    /// Objects the observer should currently hold.
    pub fn visible_objects(&self, observer: &ObserverId) -> BTreeSet<ObjectId> {
        self.visible
            .iter()
            .filter(|((_, o), visible)| o == observer && **visible)
            .map(|((object, _), _)| *object)
            .collect()
    }

    /// Attempted events of one action (`"spawn"`, `"sync"`, `"remove"`) to an observer.
    pub fn count(&self, observer: &ObserverId, label: &str) -> usize {
        self.counts
            .iter()
            .filter(|((o, l), _)| o == observer && *l == label)
            .map(|(_, n)| *n)
            .sum()
    }

    /// Forgets a disconnected observer (its marks were dropped silently).
    pub fn forget(&mut self, observer: &ObserverId) {
        self.visible.retain(|(_, o), _| o != observer);
    }

    /// Records a violation found outside the event stream (e.g. an undecodable frame).
    pub fn flag(&mut self, violation: impl Into<String>) {
        self.violations.push(violation.into());
    }

    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

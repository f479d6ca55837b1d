//! Interest replicator - range-gated Spawn / Sync / Remove per observer.
//!
//! For every (object, observer) pair the replicator remembers one bit:
//! visible or not. `reconcile()` re-derives that bit from the current
//! distance every tick and emits the transition:
//!
//! ```text
//!                  in range, not visible ──> Spawn (full state)
//! NotVisible  ─────────────────────────────────────────────>  Visible
//!             <─────────────────────────────────────────────
//!                  out of range / canceled / observer gone ──> Remove
//!
//! Visible + dirty ──> Sync (full state), dirty cleared after every observer is served
//! ```
//!
//! Marks are updated before anything is sent. A failed send is logged and
//! counted, but the mark stands: a lost Spawn is never resent. The observer
//! catches up the next time the object leaves and re-enters its range.

use crate::codec::Codec;
use crate::config::valid_range;
use crate::frame::{ReplicationAction, ReplicationEvent};
use crate::managed::{ManagedObjectSet, ObjectHandle, ObjectKind};
use replica_env::{KindId, ObjectId, ObserverId, ObserverSnapshot, ObserverTransport};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, trace, warn};

/// Event counts from one or more reconcile passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub spawns: usize,
    pub syncs: usize,
    pub removes: usize,

    /// Sends the transport rejected (visibility state kept)
    pub failed_sends: usize,

    /// Objects whose state could not be encoded this tick
    pub encode_failures: usize,
}

impl ReconcileReport {
    /// Total events handed to the transport, successful or not.
    pub fn events(&self) -> usize {
        self.spawns + self.syncs + self.removes
    }

    pub fn merge(&mut self, other: &ReconcileReport) {
        self.spawns += other.spawns;
        self.syncs += other.syncs;
        self.removes += other.removes;
        self.failed_sends += other.failed_sends;
        self.encode_failures += other.encode_failures;
    }
}

/// Planned event for one observer.
struct Outbound {
    observer: ObserverId,
    action: ReplicationAction,
}

/// Per-kind visibility bookkeeping.
#[derive(Debug)]
pub struct InterestReplicator {
    kind: KindId,

    /// Range used when an object does not report its own
    default_range: f64,

    /// Observers each object is currently visible to, in the order they gained it
    visibility: HashMap<ObjectId, Vec<ObserverId>>,
}

impl InterestReplicator {
    pub fn new(kind: KindId, default_range: f64) -> Self {
        Self {
            kind,
            default_range,
            visibility: HashMap::new(),
        }
    }

    pub fn kind(&self) -> &KindId {
        &self.kind
    }

    pub fn default_range(&self) -> f64 {
        self.default_range
    }

    /// Diffs visibility for every authoritative object and emits the transitions.
    ///
    /// Call once per tick after `tick_all()`. Calling it again within the same
    /// tick with nothing changed emits nothing.
    pub fn reconcile<T: ObjectKind>(
        &mut self,
        tick: u64,
        objects: &ManagedObjectSet<T>,
        observers: &[ObserverSnapshot],
        codec: &dyn Codec<T>,
        transport: &dyn ObserverTransport,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut seen = HashSet::new();

        for handle in objects.server_objects() {
            let id = handle.id();
            seen.insert(id);

            let planned = if handle.is_canceled() {
                self.plan_canceled(id)
            } else {
                self.plan_live(&handle, observers, codec, &mut report)
            };

            for outbound in planned {
                self.emit(tick, id, outbound, transport, &mut report);
            }
        }

        // Objects reaped before their cancellation was reconciled.
        let orphans: Vec<ObjectId> = self
            .visibility
            .keys()
            .filter(|id| !seen.contains(*id))
            .copied()
            .collect();
        for id in orphans {
            for outbound in self.plan_canceled(id) {
                self.emit(tick, id, outbound, transport, &mut report);
            }
        }

        if report.events() > 0 || report.failed_sends > 0 {
            debug!(
                kind = %self.kind,
                tick,
                spawns = report.spawns,
                syncs = report.syncs,
                removes = report.removes,
                failed_sends = report.failed_sends,
                "Reconciled visibility"
            );
        }
        report
    }

    /// Rule 1: a canceled object is removed from every observer that sees it.
    fn plan_canceled(&mut self, id: ObjectId) -> Vec<Outbound> {
        self.visibility
            .remove(&id)
            .unwrap_or_default()
            .into_iter()
            .map(|observer| Outbound {
                observer,
                action: ReplicationAction::Remove,
            })
            .collect()
    }

    /// Rules 2 to 5 for one live object, then the dirty clear.
    fn plan_live<T: ObjectKind>(
        &mut self,
        handle: &ObjectHandle<T>,
        observers: &[ObserverSnapshot],
        codec: &dyn Codec<T>,
        report: &mut ReconcileReport,
    ) -> Vec<Outbound> {
        let id = handle.id();

        // Anything marked dirty after this point stays dirty for the next tick.
        let version = handle.dirty().version();
        let dirty = handle.is_dirty();
        let position = handle.position();
        let range = handle
            .view_range()
            .filter(|r| valid_range(*r))
            .unwrap_or(self.default_range);

        let visible = self.visibility.entry(id).or_default();
        let mut state: Option<Vec<u8>> = None;
        let mut encode_failed = false;
        let mut planned = Vec::new();

        for observer in observers {
            let in_range = observer.distance_to(&position) <= range;
            let was_visible = visible.contains(&observer.id);

            let needs_state = (in_range && !was_visible) || (in_range && was_visible && dirty);
            if needs_state && state.is_none() && !encode_failed {
                match handle.encode_with(codec) {
                    Ok(bytes) => state = Some(bytes),
                    Err(e) => {
                        error!(kind = %self.kind, object = %id, error = %e, "Failed to encode object state");
                        encode_failed = true;
                        report.encode_failures += 1;
                    }
                }
            }

            match (in_range, was_visible) {
                (true, false) => {
                    // Stays NotVisible until a snapshot can actually be sent.
                    if let Some(bytes) = &state {
                        visible.push(observer.id);
                        planned.push(Outbound {
                            observer: observer.id,
                            action: ReplicationAction::Spawn { state: bytes.clone() },
                        });
                    }
                }
                (true, true) if dirty => {
                    if let Some(bytes) = &state {
                        planned.push(Outbound {
                            observer: observer.id,
                            action: ReplicationAction::Sync { state: bytes.clone() },
                        });
                    }
                }
                (false, true) => {
                    visible.retain(|o| *o != observer.id);
                    planned.push(Outbound {
                        observer: observer.id,
                        action: ReplicationAction::Remove,
                    });
                }
                _ => {}
            }
        }

        // Observers that dropped out of the enumeration are out of range.
        visible.retain(|marked| {
            let present = observers.iter().any(|o| o.id == *marked);
            if !present {
                planned.push(Outbound {
                    observer: *marked,
                    action: ReplicationAction::Remove,
                });
            }
            present
        });

        if visible.is_empty() {
            self.visibility.remove(&id);
        }
        if dirty && !encode_failed {
            handle.dirty().clear_through(version);
        }
        planned
    }

    fn emit(
        &self,
        tick: u64,
        object: ObjectId,
        outbound: Outbound,
        transport: &dyn ObserverTransport,
        report: &mut ReconcileReport,
    ) {
        let label = outbound.action.label();
        match &outbound.action {
            ReplicationAction::Spawn { .. } => report.spawns += 1,
            ReplicationAction::Sync { .. } => report.syncs += 1,
            ReplicationAction::Remove => report.removes += 1,
        }

        let event = ReplicationEvent::new(self.kind.clone(), object, tick, outbound.action);
        let payload = match event.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!(kind = %self.kind, object = %object, error = %e, "Failed to frame replication event");
                report.encode_failures += 1;
                return;
            }
        };

        match transport.send(outbound.observer, payload) {
            Ok(()) => {
                trace!(kind = %self.kind, object = %object, observer = %outbound.observer, tick, action = label, "Sent");
            }
            Err(e) => {
                warn!(
                    kind = %self.kind,
                    object = %object,
                    observer = %outbound.observer,
                    action = label,
                    error = %e,
                    "Replication send failed"
                );
                report.failed_sends += 1;
            }
        }
    }

    /// Drops every mark for a disconnected observer without emitting anything.
    pub fn forget_observer(&mut self, observer: &ObserverId) {
        self.visibility.retain(|_, visible| {
            visible.retain(|o| o != observer);
            !visible.is_empty()
        });
    }

    /// Observers the object is currently visible to.
    pub fn visible_to(&self, object: &ObjectId) -> Vec<ObserverId> {
        self.visibility.get(object).cloned().unwrap_or_default()
    }

    pub fn is_visible(&self, object: &ObjectId, observer: &ObserverId) -> bool {
        self.visibility
            .get(object)
            .is_some_and(|visible| visible.contains(observer))
    }

    /// Number of objects visible to at least one observer.
    pub fn tracked_objects(&self) -> usize {
        self.visibility.len()
    }

    pub fn clear(&mut self) {
        self.visibility.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::error::CodecError;
    use crate::managed::TickOutcome;
    use nalgebra::Point3;
    use proptest::prelude::*;
    use replica_env::EnvError;
    use serde::Deserialize;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Orb {
        position: [f64; 3],
        range: Option<f64>,
    }

    impl Orb {
        fn at(x: f64) -> Self {
            Self {
                position: [x, 0.0, 0.0],
                range: None,
            }
        }
    }

    impl ObjectKind for Orb {
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

    /// Transport recording every decoded event; selected observers fail.
    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(ObserverId, ReplicationEvent)>>,
        unreachable: Mutex<HashSet<ObserverId>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<(ObserverId, ReplicationAction)> {
            self.sent
                .lock()
                .unwrap()
                .drain(..)
                .map(|(observer, event)| (observer, event.action))
                .collect()
        }

        fn labels(&self) -> Vec<(ObserverId, &'static str)> {
            self.take().iter().map(|(o, a)| (*o, a.label())).collect()
        }
    }

    impl ObserverTransport for Recorder {
        fn send(&self, observer: ObserverId, payload: Vec<u8>) -> Result<(), EnvError> {
            if self.unreachable.lock().unwrap().contains(&observer) {
                return Err(EnvError::unreachable(observer));
            }
            let event = ReplicationEvent::decode(&payload).unwrap();
            self.sent.lock().unwrap().push((observer, event));
            Ok(())
        }
    }

    struct Harness {
        set: ManagedObjectSet<Orb>,
        replicator: InterestReplicator,
        codec: JsonCodec<Orb>,
        transport: Recorder,
        tick: u64,
    }

    impl Harness {
        fn new() -> Self {
            let kind = KindId::from("orb");
            Self {
                set: ManagedObjectSet::new(kind.clone()),
                replicator: InterestReplicator::new(kind, 64.0),
                codec: JsonCodec::new(),
                transport: Recorder::default(),
                tick: 0,
            }
        }

        /// One host tick: tick_all then reconcile.
        fn step(&mut self, observers: &[ObserverSnapshot]) -> ReconcileReport {
            self.tick += 1;
            self.set.tick_all();
            self.reconcile(observers)
        }

        fn reconcile(&mut self, observers: &[ObserverSnapshot]) -> ReconcileReport {
            self.replicator
                .reconcile(self.tick, &self.set, observers, &self.codec, &self.transport)
        }
    }

    fn observer(seed: u64, x: f64) -> ObserverSnapshot {
        ObserverSnapshot::new(ObserverId::from_seed(seed), Point3::new(x, 0.0, 0.0))
    }

    #[test]
    fn test_proximity_scenario() {
        let mut h = Harness::new();
        let orb = h.set.spawn_server(Orb::at(0.0));
        let p = ObserverId::from_seed(1);

        // In range at 50 < 64
        h.step(&[observer(1, 50.0)]);
        assert_eq!(h.transport.labels(), vec![(p, "spawn")]);

        // Out of range at 100
        h.step(&[observer(1, 100.0)]);
        assert_eq!(h.transport.labels(), vec![(p, "remove")]);

        // Changed while out of range: nothing
        orb.update(|o| o.position = [5.0, 0.0, 0.0]);
        h.step(&[observer(1, 100.0)]);
        assert!(h.transport.take().is_empty());

        // Back in range: exactly one Spawn carrying the new state
        h.step(&[observer(1, 50.0)]);
        let events = h.transport.take();
        assert_eq!(events.len(), 1);
        match &events[0].1 {
            ReplicationAction::Spawn { state } => {
                let decoded = h.codec.decode(state).unwrap();
                assert_eq!(decoded.position, [5.0, 0.0, 0.0]);
            }
            other => panic!("expected spawn, got {other:?}"),
        }
    }

    #[test]
    fn test_sync_only_when_dirty_and_visible() {
        let mut h = Harness::new();
        let orb = h.set.spawn_server(Orb::at(0.0));
        let near = [observer(1, 10.0), observer(2, 500.0)];

        h.step(&near);
        assert_eq!(h.transport.labels(), vec![(ObserverId::from_seed(1), "spawn")]);

        h.step(&near);
        assert!(h.transport.take().is_empty());

        orb.update(|o| o.position = [1.0, 0.0, 0.0]);
        h.step(&near);
        assert_eq!(h.transport.labels(), vec![(ObserverId::from_seed(1), "sync")]);
        assert!(!orb.is_dirty());
    }

    #[test]
    fn test_reconcile_twice_same_tick_emits_nothing_new() {
        let mut h = Harness::new();
        let orb = h.set.spawn_server(Orb::at(0.0));
        let gone = h.set.spawn_server(Orb::at(0.0));
        let observers = [observer(1, 10.0), observer(2, 20.0)];

        h.step(&observers);
        h.transport.take();

        orb.update(|o| o.position = [2.0, 0.0, 0.0]);
        gone.cancel();
        let first = h.reconcile(&observers);
        let second = h.reconcile(&observers);

        assert_eq!(first.syncs, 2);
        assert_eq!(first.removes, 2);
        assert_eq!(second.events(), 0);
    }

    #[test]
    fn test_canceled_object_removed_from_every_visible_observer() {
        let mut h = Harness::new();
        let orb = h.set.spawn_server(Orb::at(0.0));
        let observers = [observer(1, 10.0), observer(2, 20.0), observer(3, 900.0)];
        h.step(&observers);
        h.transport.take();

        orb.cancel();
        h.reconcile(&observers);
        let mut removed: Vec<_> = h.transport.labels();
        removed.sort();
        let mut expected = vec![
            (ObserverId::from_seed(1), "remove"),
            (ObserverId::from_seed(2), "remove"),
        ];
        expected.sort();
        assert_eq!(removed, expected);

        // Reaped next pass; no further events.
        h.step(&observers);
        assert!(h.transport.take().is_empty());
        assert_eq!(h.set.server_len(), 0);
    }

    #[test]
    fn test_orphan_sweep_after_unreconciled_reap() {
        let mut h = Harness::new();
        let orb = h.set.spawn_server(Orb::at(0.0));
        let observers = [observer(1, 10.0)];
        h.step(&observers);
        h.transport.take();

        // Canceled and reaped with no reconcile in between.
        orb.cancel();
        h.set.tick_all();
        assert_eq!(h.set.server_len(), 0);

        h.reconcile(&observers);
        assert_eq!(h.transport.labels(), vec![(ObserverId::from_seed(1), "remove")]);
        assert_eq!(h.replicator.tracked_objects(), 0);
    }

    #[test]
    fn test_failed_send_keeps_visibility() {
        let mut h = Harness::new();
        let orb = h.set.spawn_server(Orb::at(0.0));
        let down = ObserverId::from_seed(1);
        let up = ObserverId::from_seed(2);
        h.transport.unreachable.lock().unwrap().insert(down);
        let observers = [observer(1, 10.0), observer(2, 10.0)];

        let report = h.step(&observers);
        assert_eq!(report.spawns, 2);
        assert_eq!(report.failed_sends, 1);
        assert_eq!(h.transport.labels(), vec![(up, "spawn")]);
        assert!(h.replicator.is_visible(&orb.id(), &down));

        // Link back: the repair is a Sync, not a second Spawn.
        h.transport.unreachable.lock().unwrap().clear();
        orb.update(|o| o.position = [1.0, 0.0, 0.0]);
        h.step(&observers);
        assert_eq!(h.transport.labels(), vec![(down, "sync"), (up, "sync")]);
    }

    #[test]
    fn test_missing_observer_gets_remove_and_forget_is_silent() {
        let mut h = Harness::new();
        let orb = h.set.spawn_server(Orb::at(0.0));
        h.step(&[observer(1, 10.0), observer(2, 10.0)]);
        h.transport.take();

        h.step(&[observer(2, 10.0)]);
        assert_eq!(h.transport.labels(), vec![(ObserverId::from_seed(1), "remove")]);

        h.replicator.forget_observer(&ObserverId::from_seed(2));
        assert!(h.replicator.visible_to(&orb.id()).is_empty());
        h.step(&[]);
        assert!(h.transport.take().is_empty());
    }

    #[test]
    fn test_per_object_range_overrides_default() {
        let mut h = Harness::new();
        h.set.spawn_server(Orb {
            position: [0.0; 3],
            range: Some(5.0),
        });
        h.step(&[observer(1, 10.0)]);
        assert!(h.transport.take().is_empty());

        h.step(&[observer(1, 4.0)]);
        assert_eq!(h.transport.labels(), vec![(ObserverId::from_seed(1), "spawn")]);
    }

    #[test]
    fn test_events_follow_enumeration_order() {
        let mut h = Harness::new();
        h.set.spawn_server(Orb::at(0.0));
        let order = [observer(7, 1.0), observer(3, 2.0), observer(5, 3.0)];
        h.step(&order);
        let got: Vec<ObserverId> = h.transport.take().into_iter().map(|(o, _)| o).collect();
        let expected: Vec<ObserverId> = order.iter().map(|o| o.id).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_encode_failure_spawns_nothing_and_keeps_dirty() {
        struct Broken;

        impl Codec<Orb> for Broken {
            fn encode(&self, _: &Orb) -> Result<Vec<u8>, CodecError> {
                Err(CodecError::encode("broken"))
            }

            fn decode(&self, _: &[u8]) -> Result<Orb, CodecError> {
                Err(CodecError::decode("broken"))
            }
        }

        let set = ManagedObjectSet::new(KindId::from("orb"));
        let orb = set.spawn_server(Orb::at(0.0));
        orb.mark_dirty();
        let mut replicator = InterestReplicator::new(KindId::from("orb"), 64.0);
        let transport = Recorder::default();

        let report = replicator.reconcile(1, &set, &[observer(1, 1.0)], &Broken, &transport);
        assert_eq!(report.encode_failures, 1);
        assert_eq!(report.spawns, 0);
        assert!(orb.is_dirty());
        assert!(!replicator.is_visible(&orb.id(), &ObserverId::from_seed(1)));
    }

    #[test]
    fn test_mutation_during_reconcile_stays_dirty() {
        /// Marks one object dirty from inside `encode`, once.
        #[derive(Default)]
        struct Meddling {
            json: JsonCodec<Orb>,
            armed: Mutex<Option<ObjectHandle<Orb>>>,
        }

        impl Codec<Orb> for Meddling {
            fn encode(&self, value: &Orb) -> Result<Vec<u8>, CodecError> {
                if let Some(handle) = self.armed.lock().unwrap().take() {
                    handle.mark_dirty();
                }
                self.json.encode(value)
            }

            fn decode(&self, bytes: &[u8]) -> Result<Orb, CodecError> {
                self.json.decode(bytes)
            }
        }

        let set = ManagedObjectSet::new(KindId::from("orb"));
        let orb = set.spawn_server(Orb::at(0.0));
        let mut replicator = InterestReplicator::new(KindId::from("orb"), 64.0);
        let transport = Recorder::default();
        let codec = Meddling::default();
        let observers = [observer(1, 10.0), observer(2, 20.0)];

        replicator.reconcile(1, &set, &observers, &codec, &transport);
        transport.take();

        orb.update(|o| o.position[1] = 1.0);
        *codec.armed.lock().unwrap() = Some(orb.clone());
        let report = replicator.reconcile(2, &set, &observers, &codec, &transport);
        assert_eq!(report.syncs, 2);
        assert!(orb.is_dirty(), "mutation made while encoding was cleared");

        // The racing mutation is served on the next tick, then the object is clean.
        let report = replicator.reconcile(3, &set, &observers, &codec, &transport);
        assert_eq!(report.syncs, 2);
        assert!(!orb.is_dirty());

        let report = replicator.reconcile(4, &set, &observers, &codec, &transport);
        assert_eq!(report.events(), 0);
    }

    proptest! {
        #[test]
        fn prop_visibility_transitions_are_monotonic(
            walk in prop::collection::vec((0.0f64..150.0, 0.0f64..150.0, any::<bool>(), any::<bool>()), 1..60)
        ) {
            let mut h = Harness::new();
            let orb = h.set.spawn_server(Orb::at(0.0));
            let mut visible: HashMap<ObserverId, bool> = HashMap::new();

            for (a, b, touch, twice) in walk {
                if touch {
                    orb.update(|o| o.position[1] += 1.0);
                }
                let observers = [observer(1, a), observer(2, b)];
                h.step(&observers);
                if twice {
                    let again = h.reconcile(&observers);
                    prop_assert_eq!(again.events(), 0);
                }

                for (id, action) in h.transport.take() {
                    let state = visible.entry(id).or_insert(false);
                    match action {
                        ReplicationAction::Spawn { .. } => {
                            prop_assert!(!*state, "spawn while visible");
                            *state = true;
                        }
                        ReplicationAction::Sync { .. } => prop_assert!(*state, "sync before spawn"),
                        ReplicationAction::Remove => {
                            prop_assert!(*state, "remove before spawn");
                            *state = false;
                        }
                    }
                }

                for snapshot in &observers {
                    let in_range = snapshot.distance_to(&orb.position()) <= 64.0;
                    prop_assert_eq!(visible.get(&snapshot.id).copied().unwrap_or(false), in_range);
                }
            }
        }
    }
}

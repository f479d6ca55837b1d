//! SimWorld - The simulation harness container.
//!
//! One `ReplicaHost` on the server side, one client `KindRegistry` per
//! observer on the other, and the simulated transport in between. A step:
//! 1. advance the virtual clock and move the oracle's walkers
//! 2. run one host tick
//! 3. feed every send attempt of that tick to the protocol audit
//! 4. deliver inboxes to the matching clients and tick their views

use crate::audit::ProtocolAudit;
use crate::context::SimClock;
use crate::directory::SimDirectory;
use crate::kinds::{beacon_descriptor, flare_descriptor, Beacon, Flare};
use crate::network::{SimLinkController, SimTransport};
use crate::oracle::Oracle;

use nalgebra::Point3;
use replica_core::{
    KindRegistry, ManagedObjectSet, ObjectHandle, ReplicaConfig, ReplicaError, ReplicaHost, ReplicationEvent,
    TickSummary,
};
use replica_env::{ObjectId, ObserverId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Tick rate in Hz
    pub tick_rate_hz: u32,

    /// Host-wide view range
    pub view_range: f64,

    /// Half-width of the square arena walkers move in
    pub arena: f64,

    /// Per-step position jitter standard deviation for walkers
    pub observer_jitter_std: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            tick_rate_hz: 20,
            view_range: 64.0,
            arena: 200.0,
            observer_jitter_std: 0.0,
        }
    }
}

impl SimConfig {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }
}

/// One observer's side of the wire.
pub struct ObserverClient {
    pub beacons: Arc<ManagedObjectSet<Beacon>>,
    pub flares: Arc<ManagedObjectSet<Flare>>,

    /// Frames applied so far
    pub frames: u64,

    /// Frames the client registry rejected
    pub decode_failures: u64,

    registry: KindRegistry,
}

impl ObserverClient {
    fn new(view_range: f64) -> Result<Self, ReplicaError> {
        let mut registry = KindRegistry::new();
        let beacons = registry.register(beacon_descriptor()?, view_range)?;
        let flares = registry.register(flare_descriptor()?, view_range)?;
        Ok(Self {
            beacons,
            flares,
            frames: 0,
            decode_failures: 0,
            registry,
        })
    }

    /// Every replicated object this client holds, across kinds.
    pub fn object_ids(&self) -> BTreeSet<ObjectId> {
        self.beacons
            .client_ids()
            .into_iter()
            .chain(self.flares.client_ids())
            .collect()
    }

    fn apply(&mut self, frame: &[u8]) {
        self.frames += 1;
        if let Err(e) = self.registry.apply_frame(frame) {
            self.decode_failures += 1;
            warn!(error = %e, "Client dropped frame");
        }
    }

    fn tick(&self) {
        for kind in self.registry.iter() {
            kind.tick_client();
        }
    }
}

/// A client's object set against what the wire says it should hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    pub observer: ObserverId,

    /// Visible on the server, absent on the client
    pub missing: BTreeSet<ObjectId>,

    /// Present on the client, not visible on the server
    pub extra: BTreeSet<ObjectId>,
}

/// What one `SimWorld::step` did.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepReport {
    pub summary: TickSummary,

    /// Frames handed to clients
    pub delivered: usize,
}

/// The SimWorld - container for the entire simulation.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Ground truth for walking observers
    pub oracle: Oracle,

    /// Link fault injection
    pub links: SimLinkController,

    clock: Arc<SimClock>,
    transport: Arc<SimTransport>,
    directory: Arc<SimDirectory>,
    host: ReplicaHost<SimTransport, SimDirectory>,

    beacons: Arc<ManagedObjectSet<Beacon>>,
    flares: Arc<ManagedObjectSet<Flare>>,

    clients: BTreeMap<ObserverId, ObserverClient>,
    audit: ProtocolAudit,
}

impl SimWorld {
    /// Creates a world with both demo kinds registered and no observers.
    pub fn new(config: SimConfig) -> Result<Self, ReplicaError> {
        // Separate seeds so link faults don't change walker trajectories
        let transport_seed = config.seed;
        let physics_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);

        let clock = SimClock::shared(config.tick_rate_hz);
        let links = SimLinkController::new();
        let transport = SimTransport::shared(transport_seed, links.clone());
        let directory = Arc::new(SimDirectory::new());

        let mut oracle = Oracle::new(physics_seed, config.arena);
        oracle.set_jitter(config.observer_jitter_std);

        let host_config = ReplicaConfig {
            tick_rate_hz: config.tick_rate_hz,
            default_view_range: config.view_range,
            ..ReplicaConfig::default()
        };
        let mut host = ReplicaHost::new(Arc::clone(&transport), Arc::clone(&directory), host_config)?;
        let beacons = host.register_kind(beacon_descriptor()?)?;
        let flares = host.register_kind(flare_descriptor()?)?;

        Ok(Self {
            config,
            oracle,
            links,
            clock,
            transport,
            directory,
            host,
            beacons,
            flares,
            clients: BTreeMap::new(),
            audit: ProtocolAudit::new(),
        })
    }

    // ===== OBSERVERS =====

    /// Joins an observer at a fixed position (or moves it if already joined).
    pub fn add_observer(&mut self, id: ObserverId, position: Point3<f64>) -> Result<(), ReplicaError> {
        if !self.clients.contains_key(&id) {
            self.clients.insert(id, ObserverClient::new(self.config.view_range)?);
        }
        self.directory.place(id, position);
        Ok(())
    }

    /// Joins an observer driven by the oracle at `speed` units per second.
    pub fn add_walker(&mut self, id: ObserverId, speed: f64) -> Result<Point3<f64>, ReplicaError> {
        let position = self.oracle.spawn_random_walker(id, speed);
        self.add_observer(id, position)?;
        Ok(position)
    }

    pub fn move_observer(&mut self, id: ObserverId, position: Point3<f64>) {
        self.directory.place(id, position);
    }

    /// Drops an observer from every side: directory, host, audit and client.
    pub fn disconnect_observer(&mut self, id: &ObserverId) {
        self.directory.remove(id);
        self.host.disconnect_observer(id);
        self.audit.forget(id);
        self.transport.drain(id);
        self.clients.remove(id);
    }

    pub fn client(&self, id: &ObserverId) -> Option<&ObserverClient> {
        self.clients.get(id)
    }

    pub fn observer_ids(&self) -> Vec<ObserverId> {
        self.clients.keys().copied().collect()
    }

    // ===== OBJECTS =====

    pub fn spawn_beacon(&self, beacon: Beacon) -> ObjectHandle<Beacon> {
        self.beacons.spawn_server(beacon)
    }

    pub fn beacons(&self) -> &Arc<ManagedObjectSet<Beacon>> {
        &self.beacons
    }

    pub fn flares(&self) -> &Arc<ManagedObjectSet<Flare>> {
        &self.flares
    }

    // ===== ACCESSORS =====

    pub fn host(&self) -> &ReplicaHost<SimTransport, SimDirectory> {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut ReplicaHost<SimTransport, SimDirectory> {
        &mut self.host
    }

    pub fn clock(&self) -> Arc<SimClock> {
        Arc::clone(&self.clock)
    }

    pub fn directory(&self) -> &Arc<SimDirectory> {
        &self.directory
    }

    pub fn audit(&self) -> &ProtocolAudit {
        &self.audit
    }

    pub fn tick(&self) -> u64 {
        self.host.tick_count()
    }

    // ===== STEPPING =====

    /// Runs one full tick of the world.
    pub fn step(&mut self) -> StepReport {
        let tick = self.clock.advance();

        self.oracle.step(self.host.config().tick_secs());
        for (id, position) in self.oracle.positions() {
            if self.clients.contains_key(&id) {
                self.directory.place(id, position);
            }
        }

        let summary = self.host.tick_at(tick);
        self.audit_wire();
        let delivered = self.deliver();

        StepReport { summary, delivered }
    }

    /// Runs `ticks` steps and returns the last report.
    pub fn run_ticks(&mut self, ticks: u64) -> StepReport {
        let mut last = StepReport::default();
        for _ in 0..ticks {
            last = self.step();
        }
        last
    }

    /// Feeds every send attempt since the last step into the audit.
    fn audit_wire(&mut self) {
        for record in self.transport.take_log() {
            match ReplicationEvent::decode(&record.payload) {
                Ok(event) => self.audit.record(record.observer, &event),
                Err(e) => self.audit.flag(format!("undecodable frame to {}: {e}", record.observer)),
            }
        }
    }

    /// Applies delivered frames to their clients, then ticks client views.
    fn deliver(&mut self) -> usize {
        let mut delivered = 0;
        for (id, client) in self.clients.iter_mut() {
            for frame in self.transport.drain(id) {
                client.apply(&frame);
                delivered += 1;
            }
            client.tick();
        }
        debug!(tick = self.host.tick_count(), delivered, "Frames delivered");
        delivered
    }

    // ===== CONVERGENCE =====

    /// Compares one client against the audit's derived visibility.
    pub fn divergence(&self, observer: &ObserverId) -> Option<Divergence> {
        let client = self.clients.get(observer)?;
        let expected = self.audit.visible_objects(observer);
        let actual = client.object_ids();

        let missing: BTreeSet<_> = expected.difference(&actual).copied().collect();
        let extra: BTreeSet<_> = actual.difference(&expected).copied().collect();
        if missing.is_empty() && extra.is_empty() {
            None
        } else {
            Some(Divergence {
                observer: *observer,
                missing,
                extra,
            })
        }
    }

    /// Every diverged client, in observer order.
    pub fn divergences(&self) -> Vec<Divergence> {
        self.clients.keys().filter_map(|id| self.divergence(id)).collect()
    }
}

//! Host Runtime - drives every replication component once per tick.
//!
//! This module is the integration layer between the synchronous core
//! (scheduler, animators, path motions, object sets, replicators) and the
//! environment abstraction (transport, observer directory, frame clock).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ReplicaHost                           │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │         Env: ObserverTransport + ObserverDirectory   │   │
//! │  │  • send() → best-effort frame delivery               │   │
//! │  │  • enumerate_near() → observers for this tick        │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │                              │                               │
//! │  ┌───────────┐ ┌─────────┐ ┌──────────────┐ ┌───────────┐   │
//! │  │ SCHEDULER │ │  KINDS  │ │ PATH MOTIONS │ │ RECONCILE │   │
//! │  │  advance  │ │tick_all │ │     tick     │ │ per kind  │   │
//! │  └───────────┘ └─────────┘ └──────────────┘ └───────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The four stages always run in that order, once per tick, followed by
//! session expiry. Nothing inside a tick awaits; only `run()` suspends,
//! between ticks, on the frame clock.
//!
//! # Usage
//!
//! ```ignore
//! use replica_core::{ReplicaConfig, ReplicaHost, KindDescriptor};
//! use replica_env::{ChannelTransport, StaticDirectory, TokioFrameClock};
//!
//! let mut host = ReplicaHost::new(transport, directory, ReplicaConfig::default())?;
//! let flares = host.register_kind(KindDescriptor::<Flare>::builder("flare").json().build()?)?;
//! host.run(TokioFrameClock::shared(20), shutdown_rx).await;
//! ```

use crate::config::ReplicaConfig;
use crate::error::ReplicaError;
use crate::interest::ReconcileReport;
use crate::managed::{ClientApply, ManagedObjectSet, ObjectHandle, ObjectKind, Teleport};
use crate::metrics::ReplicationMetrics;
use crate::path_motion::{MotionHandle, PathMotion, PathMotionRegistry};
use crate::registry::{KindDescriptor, KindRegistry};
use crate::scheduler::{SchedulerHandle, TickScheduler};
use crate::session::ObserverSessions;
use nalgebra::{Point3, Vector3};
use replica_env::{FrameClock, ObserverDirectory, ObserverId, ObserverTransport};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// What one host tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub tick: u64,

    /// Server and client objects ticked
    pub ticked: usize,

    /// Authoritative objects reaped
    pub reaped: usize,

    /// Path motions still registered after the tick
    pub motions: usize,

    pub reconcile: ReconcileReport,
}

/// Owns every replication component and the collaborators they talk to.
///
/// Generic over the transport and directory so the same host runs in
/// production (tokio channels) or in the deterministic simulator.
pub struct ReplicaHost<Net, Dir>
where
    Net: ObserverTransport,
    Dir: ObserverDirectory,
{
    /// Validated configuration
    config: ReplicaConfig,

    /// Outbound frames
    transport: Arc<Net>,

    /// Observer positions
    directory: Arc<Dir>,

    scheduler: TickScheduler,

    motions: PathMotionRegistry,

    kinds: KindRegistry,

    sessions: ObserverSessions,

    metrics: Arc<ReplicationMetrics>,

    /// Last tick run
    tick_count: u64,
}

impl<Net, Dir> ReplicaHost<Net, Dir>
where
    Net: ObserverTransport,
    Dir: ObserverDirectory,
{
    /// Creates a host; fails fast on an invalid configuration.
    pub fn new(transport: Arc<Net>, directory: Arc<Dir>, config: ReplicaConfig) -> Result<Self, ReplicaError> {
        config.validate()?;
        info!(
            tick_rate_hz = config.tick_rate_hz,
            view_range = config.default_view_range,
            "Replica host created"
        );

        Ok(Self {
            config,
            transport,
            directory,
            scheduler: TickScheduler::new(),
            motions: PathMotionRegistry::new(),
            kinds: KindRegistry::new(),
            sessions: ObserverSessions::new(),
            metrics: ReplicationMetrics::shared(),
            tick_count: 0,
        })
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    /// Registers a kind; its range defaults to the host's view range.
    pub fn register_kind<T: ObjectKind>(
        &mut self,
        descriptor: KindDescriptor<T>,
    ) -> Result<Arc<ManagedObjectSet<T>>, ReplicaError> {
        self.kinds.register(descriptor, self.config.default_view_range)
    }

    pub fn kinds(&self) -> &KindRegistry {
        &self.kinds
    }

    pub fn scheduler(&self) -> &TickScheduler {
        &self.scheduler
    }

    /// Cloneable submit handle for other threads.
    pub fn scheduler_handle(&self) -> SchedulerHandle {
        self.scheduler.handle()
    }

    pub fn motions_mut(&mut self) -> &mut PathMotionRegistry {
        &mut self.motions
    }

    /// Moves an object along `displacement`, starting where it is now.
    pub fn attach_path<T, D>(&mut self, handle: &ObjectHandle<T>, displacement: D) -> MotionHandle
    where
        T: ObjectKind + Teleport,
        D: Fn(u64) -> Vector3<f64> + Send + 'static,
    {
        let motion = PathMotion::new(handle.position(), Arc::new(handle.clone()), displacement);
        self.motions.apply(motion)
    }

    pub fn sessions(&self) -> &ObserverSessions {
        &self.sessions
    }

    pub fn sessions_mut(&mut self) -> &mut ObserverSessions {
        &mut self.sessions
    }

    pub fn metrics(&self) -> Arc<ReplicationMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn transport(&self) -> &Arc<Net> {
        &self.transport
    }

    pub fn directory(&self) -> &Arc<Dir> {
        &self.directory
    }

    /// Returns the last tick run.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Runs the next tick.
    pub fn tick(&mut self) -> TickSummary {
        self.tick_at(self.tick_count + 1)
    }

    /// Runs one tick stamped with `tick`.
    pub fn tick_at(&mut self, tick: u64) -> TickSummary {
        self.tick_count = tick;
        self.metrics.record_tick();
        let mut summary = TickSummary {
            tick,
            ..TickSummary::default()
        };

        // 1. Deferred work
        self.scheduler.advance();

        // 2. Objects, both views
        for kind in self.kinds.iter() {
            let server = kind.tick_server();
            let client = kind.tick_client();
            summary.ticked += server.ticked + client.ticked;
            summary.reaped += server.reaped;
        }
        self.metrics.record_reaped(summary.reaped);

        // 3. Path motions
        self.motions.tick();
        summary.motions = self.motions.len();

        // 4. Visibility, one directory query for every kind
        let center = Point3::from(self.config.interest_center);
        let observers = self.directory.enumerate_near(&center, self.config.interest_radius);
        for kind in self.kinds.iter_mut() {
            let report = kind.reconcile(tick, &observers, self.transport.as_ref());
            summary.reconcile.merge(&report);
        }
        self.metrics.record_reconcile(&summary.reconcile);

        self.sessions.expire(tick);

        debug!(
            tick,
            observers = observers.len(),
            ticked = summary.ticked,
            reaped = summary.reaped,
            events = summary.reconcile.events(),
            "Tick complete"
        );
        summary
    }

    /// Applies one inbound frame to the matching kind's client view.
    pub fn apply_frame(&self, bytes: &[u8]) -> Result<ClientApply, ReplicaError> {
        let result = self.kinds.apply_frame(bytes);
        if matches!(result, Err(ReplicaError::Decode { .. })) {
            self.metrics.record_decode_failure();
        }
        result
    }

    /// Forgets a disconnected observer without emitting Remove events.
    pub fn disconnect_observer(&mut self, observer: &ObserverId) {
        for kind in self.kinds.iter_mut() {
            kind.forget_observer(observer);
        }
        self.sessions.forget(observer);
        info!(observer = %observer, "Observer disconnected");
    }

    /// Ticks on every frame of `clock` until `shutdown` turns true or its sender is dropped.
    ///
    /// Returns the number of ticks run.
    pub async fn run<C: FrameClock>(&mut self, clock: Arc<C>, mut shutdown: watch::Receiver<bool>) -> u64 {
        info!(tick_rate_hz = clock.tick_rate_hz(), "Replica host loop started");
        let mut ran = 0u64;

        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                tick = clock.next_frame() => {
                    self.tick_at(tick);
                    ran += 1;
                }
            }
        }

        info!(ticks = ran, last_tick = self.tick_count, "Replica host loop stopped");
        ran
    }

    /// Drops every task, motion, object and session.
    pub fn shutdown(&mut self) {
        self.scheduler.clear();
        self.motions.clear();
        for kind in self.kinds.iter_mut() {
            kind.clear();
            kind.clear_client();
        }
        self.sessions.clear();
        info!(tick = self.tick_count, "Replica host shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ReplicationAction, ReplicationEvent};
    use crate::managed::TickOutcome;
    use crate::path_motion::displacement;
    use crate::scheduler::Schedule;
    use replica_env::{ChannelTransport, KindId, ObjectId, StaticDirectory, TokioFrameClock};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Ping {
        position: [f64; 3],
        ttl: u32,
    }

    impl ObjectKind for Ping {
        fn tick(&mut self) -> TickOutcome {
            self.ttl = self.ttl.saturating_sub(1);
            if self.ttl == 0 {
                TickOutcome::Finished
            } else {
                TickOutcome::Unchanged
            }
        }

        fn position(&self) -> Point3<f64> {
            Point3::from(self.position)
        }
    }

    impl Teleport for Ping {
        fn teleport(&mut self, position: Point3<f64>) {
            self.position = [position.x, position.y, position.z];
        }
    }

    type Host = ReplicaHost<ChannelTransport, StaticDirectory>;

    fn host() -> (Host, Arc<ManagedObjectSet<Ping>>) {
        let mut host = ReplicaHost::new(
            Arc::new(ChannelTransport::new()),
            Arc::new(StaticDirectory::new()),
            ReplicaConfig::default(),
        )
        .unwrap();
        let pings = host
            .register_kind(KindDescriptor::<Ping>::builder("ping").json().build().unwrap())
            .unwrap();
        (host, pings)
    }

    fn drain(rx: &mut UnboundedReceiver<Vec<u8>>) -> Vec<ReplicationEvent> {
        let mut events = Vec::new();
        while let Ok(bytes) = rx.try_recv() {
            events.push(ReplicationEvent::decode(&bytes).unwrap());
        }
        events
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ReplicaConfig {
            tick_rate_hz: 0,
            ..ReplicaConfig::default()
        };
        let result = ReplicaHost::new(
            Arc::new(ChannelTransport::new()),
            Arc::new(StaticDirectory::new()),
            config,
        );
        assert!(matches!(result, Err(ReplicaError::Configuration(_))));
    }

    #[test]
    fn test_tick_order_scheduler_before_reconcile() {
        let (mut host, pings) = host();
        let observer = ObserverId::from_seed(1);
        let mut rx = host.transport().connect(observer);
        host.directory().upsert(observer, Point3::new(10.0, 0.0, 0.0));

        // Spawned by a task on tick 1 and replicated on that same tick.
        let spawner = Arc::clone(&pings);
        host.scheduler().schedule(1, move || {
            spawner.spawn_server(Ping {
                position: [0.0; 3],
                ttl: 100,
            });
        });

        let summary = host.tick();
        assert_eq!(summary.tick, 1);
        assert_eq!(summary.reconcile.spawns, 1);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].action, ReplicationAction::Spawn { .. }));
        assert_eq!(events[0].tick, 1);
    }

    #[test]
    fn test_finished_object_removed_then_reaped() {
        let (mut host, pings) = host();
        let observer = ObserverId::from_seed(1);
        let mut rx = host.transport().connect(observer);
        host.directory().upsert(observer, Point3::origin());

        pings.spawn_server(Ping {
            position: [0.0; 3],
            ttl: 2,
        });

        host.tick();
        let spawn = drain(&mut rx);
        assert_eq!(spawn.len(), 1);

        let summary = host.tick();
        assert_eq!(summary.reconcile.removes, 1);
        assert_eq!(pings.server_len(), 1);

        let summary = host.tick();
        assert_eq!(summary.reaped, 1);
        assert_eq!(pings.server_len(), 0);
        assert_eq!(host.metrics().snapshot().reaped, 1);
    }

    #[test]
    fn test_attached_path_moves_object_out_of_range() {
        let (mut host, pings) = host();
        let observer = ObserverId::from_seed(1);
        let mut rx = host.transport().connect(observer);
        host.directory().upsert(observer, Point3::origin());

        let ping = pings.spawn_server(Ping {
            position: [0.0; 3],
            ttl: 1000,
        });
        host.attach_path(&ping, displacement::linear(Vector3::new(40.0, 0.0, 0.0)));

        host.tick(); // x = 0
        host.tick(); // x = 40, dirty
        host.tick(); // x = 80, out of range
        let labels: Vec<_> = drain(&mut rx).iter().map(|e| e.action.label()).collect();
        assert_eq!(labels, vec!["spawn", "sync", "remove"]);
    }

    #[test]
    fn test_disconnect_is_silent_and_apply_frame_counts_failures() {
        let (mut host, pings) = host();
        let observer = ObserverId::from_seed(1);
        let mut rx = host.transport().connect(observer);
        host.directory().upsert(observer, Point3::origin());
        pings.spawn_server(Ping {
            position: [0.0; 3],
            ttl: 1000,
        });
        host.tick();
        drain(&mut rx);

        host.disconnect_observer(&observer);
        host.transport().disconnect(&observer);
        host.directory().remove(&observer);
        let summary = host.tick();
        assert_eq!(summary.reconcile.events(), 0);

        assert!(host.apply_frame(b"garbage").is_err());
        assert_eq!(host.metrics().snapshot().decode_failures, 1);
    }

    #[test]
    fn test_session_expiry_runs_each_tick() {
        let (mut host, _) = host();
        let observer = ObserverId::from_seed(1);
        host.sessions_mut().add_shake(observer, 1.0, 2, 0);

        host.tick();
        assert_eq!(host.sessions().active(), 1);
        host.tick();
        assert_eq!(host.sessions().active(), 0);
    }

    #[test]
    fn test_shutdown_clears_everything() {
        let (mut host, pings) = host();
        let cancelled = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&cancelled);
        host.scheduler().submit(
            crate::scheduler::TaskBuilder::repeating(5, || {})
                .on_cancel(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
        );
        let ping = pings.spawn_server(Ping {
            position: [0.0; 3],
            ttl: 10,
        });
        pings.add_client(ObjectId::from_seed(4), Ping {
            position: [0.0; 3],
            ttl: 10,
        });
        host.tick();

        host.shutdown();
        assert!(ping.is_canceled());
        assert_eq!(pings.server_len(), 0);
        assert_eq!(pings.client_len(), 0);
        assert_eq!(host.scheduler().active_len(), 0);
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_shutdown_signal() {
        let (mut host, pings) = host();
        let observer = ObserverId::from_seed(1);
        let mut rx = host.transport().connect(observer);
        host.directory().upsert(observer, Point3::origin());
        pings.spawn_server(Ping {
            position: [0.0; 3],
            ttl: 10_000,
        });

        let (tx, shutdown) = watch::channel(false);
        let clock = TokioFrameClock::shared(200);
        let stopper = async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        };

        let (_, ran) = tokio::join!(stopper, host.run(clock, shutdown));
        assert!(ran > 0);
        assert_eq!(host.tick_count(), ran);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, KindId::from("ping"));
    }

    #[tokio::test]
    async fn test_run_loop_stops_when_sender_dropped() {
        let (mut host, _) = host();
        let (tx, shutdown) = watch::channel(false);
        drop(tx);
        let ran = host.run(TokioFrameClock::shared(100), shutdown).await;
        assert!(ran <= 1);
    }

    #[test]
    fn test_scheduler_handle_from_other_thread() {
        let (mut host, _) = host();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let handle = host.scheduler_handle();
        let sink = Arc::clone(&fired);
        std::thread::spawn(move || {
            handle.schedule(2, move || sink.lock().unwrap().push("fired"));
        })
        .join()
        .unwrap();

        host.tick();
        assert!(fired.lock().unwrap().is_empty());
        host.tick();
        assert_eq!(*fired.lock().unwrap(), vec!["fired"]);
    }
}

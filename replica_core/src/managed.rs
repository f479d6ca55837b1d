//! Managed object set - authoritative and client views of one object kind.
//!
//! The *server view* holds the authoritative objects in spawn order (list)
//! and by id (map). Both live behind one mutex so they can never disagree.
//! `tick_all()` only holds that lock to take a snapshot and to reap, never
//! while ticking, so spawning from inside an object's tick or from another
//! thread is always safe.
//!
//! The *client view* is an independent concurrent map filled from inbound
//! replication events. It is ticked by `tick_client()` and may be written
//! by the network thread at the same time.
//!
//! # Lifecycle
//!
//! ```text
//! spawn_server ──> ticked every tick_all ──> canceled (tick result, handle, clear)
//!                                               │
//!                  reconcile emits Remove  <────┘
//!                                               │
//!                  next tick_all reaps it  <────┘
//! ```

use crate::codec::Codec;
use crate::error::ReplicaError;
use crate::frame::{ReplicationAction, ReplicationEvent};
use crate::path_motion::MotionTarget;
use crate::sync::lock;
use dashmap::DashMap;
use nalgebra::Point3;
use replica_env::{KindId, ObjectId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

/// Result of ticking one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing observers need to know about
    Unchanged,

    /// State changed; marks the object dirty
    Changed,

    /// Object is finished; marks it canceled
    Finished,
}

/// Payload of a managed object kind.
pub trait ObjectKind: Send + 'static {
    /// Authoritative per-tick update.
    fn tick(&mut self) -> TickOutcome;

    /// Per-tick update of a replicated copy (prediction, cosmetic decay).
    fn client_tick(&mut self) -> TickOutcome {
        TickOutcome::Unchanged
    }

    /// World position used for interest management.
    fn position(&self) -> Point3<f64>;

    /// Per-object visibility range; `None` uses the kind/host default.
    fn view_range(&self) -> Option<f64> {
        None
    }
}

/// Kinds that path motions can move.
pub trait Teleport {
    fn teleport(&mut self, position: Point3<f64>);
}

/// Version-based dirty tracking.
///
/// Every mutation bumps `version`. Reconcile reads the version before it
/// serves observers and afterwards clears only up to that version, so a
/// mutation racing the reconcile keeps the object dirty for the next tick.
#[derive(Debug, Default)]
pub struct DirtyFlag {
    version: AtomicU64,
    synced: AtomicU64,
}

impl DirtyFlag {
    pub fn mark(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.synced.load(Ordering::Acquire) < self.version()
    }

    /// Clears everything up to and including `version`.
    pub fn clear_through(&self, version: u64) {
        self.synced.fetch_max(version, Ordering::AcqRel);
    }
}

struct ManagedCell<T> {
    id: ObjectId,
    canceled: AtomicBool,
    dirty: DirtyFlag,
    state: Mutex<T>,
}

/// Shared handle to one managed object (server or client side).
///
/// Cloning is cheap; all clones refer to the same object.
pub struct ObjectHandle<T> {
    cell: Arc<ManagedCell<T>>,
}

impl<T> Clone for ObjectHandle<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> std::fmt::Debug for ObjectHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("id", &self.cell.id)
            .field("canceled", &self.is_canceled())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

impl<T> ObjectHandle<T> {
    fn new(id: ObjectId, state: T) -> Self {
        Self {
            cell: Arc::new(ManagedCell {
                id,
                canceled: AtomicBool::new(false),
                dirty: DirtyFlag::default(),
                state: Mutex::new(state),
            }),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.cell.id
    }

    pub fn is_canceled(&self) -> bool {
        self.cell.canceled.load(Ordering::Acquire)
    }

    /// Marks the object canceled; it is removed at the next tick/reap pass.
    pub fn cancel(&self) {
        self.cell.canceled.store(true, Ordering::Release);
    }

    pub fn mark_dirty(&self) {
        self.cell.dirty.mark();
    }

    pub fn is_dirty(&self) -> bool {
        self.cell.dirty.is_dirty()
    }

    pub(crate) fn dirty(&self) -> &DirtyFlag {
        &self.cell.dirty
    }

    /// Reads the state under the object's lock.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&lock(&self.cell.state))
    }

    /// Mutates the state and marks the object dirty.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = f(&mut lock(&self.cell.state));
        self.cell.dirty.mark();
        result
    }

    /// Replaces the whole state with one loaded for `id`.
    ///
    /// Loading state that belongs to another object is a caller bug.
    pub fn load(&self, id: ObjectId, state: T) -> Result<(), ReplicaError> {
        if id != self.cell.id {
            return Err(ReplicaError::invariant(format!(
                "cannot load state of object {id} into object {}",
                self.cell.id
            )));
        }
        *lock(&self.cell.state) = state;
        self.cell.dirty.mark();
        Ok(())
    }

    /// Runs the state's tick and folds the outcome into the flags.
    fn run_tick(&self, tick: impl FnOnce(&mut T) -> TickOutcome) -> TickOutcome {
        let outcome = tick(&mut lock(&self.cell.state));
        match outcome {
            TickOutcome::Unchanged => {}
            TickOutcome::Changed => self.cell.dirty.mark(),
            TickOutcome::Finished => self.cancel(),
        }
        outcome
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<T: ObjectKind> ObjectHandle<T> {
    pub fn position(&self) -> Point3<f64> {
        self.read(|state| state.position())
    }

    pub fn view_range(&self) -> Option<f64> {
        self.read(|state| state.view_range())
    }

    pub(crate) fn encode_with(&self, codec: &dyn Codec<T>) -> Result<Vec<u8>, crate::error::CodecError> {
        self.read(|state| codec.encode(state))
    }
}

impl<T: Teleport + Send + 'static> MotionTarget for ObjectHandle<T> {
    fn is_valid(&self) -> bool {
        !self.is_canceled()
    }

    fn teleport(&self, position: Point3<f64>) {
        self.update(|state| state.teleport(position));
    }
}

/// Counts from one `tick_all` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub ticked: usize,
    pub reaped: usize,
}

/// Result of applying one inbound event to the client view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientApply {
    Spawned,
    Synced,
    Removed,
    /// Sync/Remove for an object this client does not have
    Ignored,
}

struct ServerIndex<T> {
    list: Vec<ObjectHandle<T>>,
    map: HashMap<ObjectId, ObjectHandle<T>>,
}

/// Dual-view registry of one managed-object kind.
pub struct ManagedObjectSet<T: ObjectKind> {
    kind: KindId,

    /// Authoritative objects; list and map change together under this lock
    server: Mutex<ServerIndex<T>>,

    /// Replicated copies, written by inbound replication
    client: DashMap<ObjectId, ObjectHandle<T>>,
}

impl<T: ObjectKind> std::fmt::Debug for ManagedObjectSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedObjectSet")
            .field("kind", &self.kind)
            .field("server", &self.server_len())
            .field("client", &self.client_len())
            .finish()
    }
}

impl<T: ObjectKind> ManagedObjectSet<T> {
    pub fn new(kind: KindId) -> Self {
        Self {
            kind,
            server: Mutex::new(ServerIndex {
                list: Vec::new(),
                map: HashMap::new(),
            }),
            client: DashMap::new(),
        }
    }

    pub fn kind(&self) -> &KindId {
        &self.kind
    }

    // ---------------------------------------------------------------------
    // Server view
    // ---------------------------------------------------------------------

    /// Adds an authoritative object under a fresh id.
    pub fn spawn_server(&self, state: T) -> ObjectHandle<T> {
        let handle = ObjectHandle::new(ObjectId::new(), state);
        let mut index = lock(&self.server);
        index.map.insert(handle.id(), handle.clone());
        index.list.push(handle.clone());
        trace!(kind = %self.kind, object = %handle.id(), "Spawned server object");
        handle
    }

    /// Adds an authoritative object under a caller-chosen id.
    pub fn spawn_server_with_id(&self, id: ObjectId, state: T) -> Result<ObjectHandle<T>, ReplicaError> {
        let mut index = lock(&self.server);
        if index.map.contains_key(&id) {
            return Err(ReplicaError::invariant(format!(
                "object {id} already exists in the '{}' server view",
                self.kind
            )));
        }
        let handle = ObjectHandle::new(id, state);
        index.map.insert(id, handle.clone());
        index.list.push(handle.clone());
        Ok(handle)
    }

    pub fn get_server(&self, id: &ObjectId) -> Option<ObjectHandle<T>> {
        lock(&self.server).map.get(id).cloned()
    }

    /// Snapshot of the authoritative objects in spawn order.
    pub fn server_objects(&self) -> Vec<ObjectHandle<T>> {
        lock(&self.server).list.clone()
    }

    pub fn server_len(&self) -> usize {
        lock(&self.server).list.len()
    }

    /// Reaps objects canceled before this pass, then ticks the rest.
    ///
    /// Objects that become canceled during this pass stay listed until the
    /// next pass so the following reconcile can still see them.
    pub fn tick_all(&self) -> TickReport {
        let (snapshot, reaped) = {
            let mut index = lock(&self.server);
            let before = index.list.len();
            let ServerIndex { list, map } = &mut *index;
            list.retain(|handle| {
                if handle.is_canceled() {
                    map.remove(&handle.id());
                    false
                } else {
                    true
                }
            });
            (list.clone(), before - list.len())
        };

        let mut ticked = 0;
        for handle in &snapshot {
            // Canceled by another thread since the snapshot: never tick it.
            if handle.is_canceled() {
                continue;
            }
            handle.run_tick(|state| state.tick());
            ticked += 1;
        }

        if reaped > 0 {
            debug!(kind = %self.kind, reaped, remaining = snapshot.len(), "Reaped server objects");
        }
        TickReport { ticked, reaped }
    }

    /// Cancels and drops every authoritative object.
    pub fn clear(&self) {
        let mut index = lock(&self.server);
        for handle in index.list.drain(..) {
            handle.cancel();
        }
        index.map.clear();
    }

    // ---------------------------------------------------------------------
    // Client view
    // ---------------------------------------------------------------------

    /// Inserts (or replaces) a replicated copy.
    pub fn add_client(&self, id: ObjectId, state: T) -> ObjectHandle<T> {
        let handle = ObjectHandle::new(id, state);
        if let Some(previous) = self.client.insert(id, handle.clone()) {
            previous.cancel();
        }
        handle
    }

    pub fn get_client(&self, id: &ObjectId) -> Option<ObjectHandle<T>> {
        self.client.get(id).map(|entry| entry.value().clone())
    }

    /// Cancels and drops a replicated copy.
    pub fn remove_client(&self, id: &ObjectId) -> Option<ObjectHandle<T>> {
        self.client.remove(id).map(|(_, handle)| {
            handle.cancel();
            handle
        })
    }

    pub fn client_len(&self) -> usize {
        self.client.len()
    }

    pub fn client_ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.client.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    /// Ticks every replicated copy and drops the canceled ones.
    ///
    /// A copy canceled before its turn is dropped without being ticked.
    /// No map guard is held while a copy ticks, so `client_tick` may read
    /// this set's client view.
    pub fn tick_client(&self) -> TickReport {
        let snapshot: Vec<(ObjectId, ObjectHandle<T>)> = self
            .client
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut report = TickReport::default();
        for (id, handle) in snapshot {
            if !handle.is_canceled() {
                report.ticked += 1;
                handle.run_tick(|state| state.client_tick());
            }
            if !handle.is_canceled() {
                continue;
            }
            // A replacement inserted under the same id since the snapshot stays.
            if self
                .client
                .remove_if(&id, |_, current| current.ptr_eq(&handle))
                .is_some()
            {
                report.reaped += 1;
            }
        }
        report
    }

    /// Cancels and drops every replicated copy.
    pub fn clear_client(&self) {
        self.client.retain(|_, handle| {
            handle.cancel();
            false
        });
    }

    /// Applies one inbound replication event to the client view.
    ///
    /// A state that fails to decode is dropped: a Spawn creates nothing and
    /// a Sync leaves the copy at its last good state.
    pub fn apply_inbound(&self, event: &ReplicationEvent, codec: &dyn Codec<T>) -> Result<ClientApply, ReplicaError> {
        if event.kind != self.kind {
            return Err(ReplicaError::invariant(format!(
                "'{}' event routed to the '{}' set",
                event.kind, self.kind
            )));
        }

        match &event.action {
            ReplicationAction::Spawn { state } => {
                let decoded = codec.decode(state).map_err(|e| ReplicaError::decode(&self.kind, e))?;
                self.add_client(event.object, decoded);
                Ok(ClientApply::Spawned)
            }
            ReplicationAction::Sync { state } => {
                let Some(handle) = self.get_client(&event.object) else {
                    debug!(kind = %self.kind, object = %event.object, "Sync for unknown object ignored");
                    return Ok(ClientApply::Ignored);
                };
                let decoded = codec.decode(state).map_err(|e| ReplicaError::decode(&self.kind, e))?;
                handle.load(event.object, decoded)?;
                Ok(ClientApply::Synced)
            }
            ReplicationAction::Remove => Ok(match self.remove_client(&event.object) {
                Some(_) => ClientApply::Removed,
                None => ClientApply::Ignored,
            }),
        }
    }
}

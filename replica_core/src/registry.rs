//! Static kind registration.
//!
//! Every replicated kind is registered explicitly at startup with a
//! `KindDescriptor` (id, codec, optional range). The registry pairs each
//! kind's `ManagedObjectSet` with its `InterestReplicator` and hides the
//! concrete payload type behind `ReplicatedKind`, so the host can drive
//! all kinds in registration order and route inbound frames by kind id.

use crate::codec::{Codec, JsonCodec};
use crate::config::valid_range;
use crate::error::ReplicaError;
use crate::frame::ReplicationEvent;
use crate::interest::{InterestReplicator, ReconcileReport};
use crate::managed::{ClientApply, ManagedObjectSet, ObjectKind, TickReport};
use replica_env::{KindId, ObserverId, ObserverSnapshot, ObserverTransport};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Registration record for one kind.
pub struct KindDescriptor<T> {
    kind: KindId,
    codec: Arc<dyn Codec<T>>,
    default_view_range: Option<f64>,
}

impl<T> Clone for KindDescriptor<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            codec: Arc::clone(&self.codec),
            default_view_range: self.default_view_range,
        }
    }
}

impl<T: 'static> KindDescriptor<T> {
    pub fn builder(kind: impl Into<KindId>) -> KindDescriptorBuilder<T> {
        KindDescriptorBuilder {
            kind: kind.into(),
            codec: None,
            default_view_range: None,
        }
    }

    pub fn kind(&self) -> &KindId {
        &self.kind
    }

    pub fn codec(&self) -> &dyn Codec<T> {
        self.codec.as_ref()
    }

    /// Kind-wide range, if set; otherwise the host default applies.
    pub fn default_view_range(&self) -> Option<f64> {
        self.default_view_range
    }
}

pub struct KindDescriptorBuilder<T> {
    kind: KindId,
    codec: Option<Arc<dyn Codec<T>>>,
    default_view_range: Option<f64>,
}

impl<T: 'static> KindDescriptorBuilder<T> {
    pub fn codec(mut self, codec: impl Codec<T> + 'static) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    pub fn default_view_range(mut self, range: f64) -> Self {
        self.default_view_range = Some(range);
        self
    }

    /// Fails when the id is empty, the codec is missing or the range is unusable.
    pub fn build(self) -> Result<KindDescriptor<T>, ReplicaError> {
        if self.kind.as_str().trim().is_empty() {
            return Err(ReplicaError::configuration("kind id must not be empty"));
        }
        let codec = self.codec.ok_or_else(|| {
            ReplicaError::configuration(format!("kind '{}' has no codec", self.kind))
        })?;
        if let Some(range) = self.default_view_range {
            if !valid_range(range) {
                return Err(ReplicaError::configuration(format!(
                    "kind '{}' view range must be finite and positive, got {range}",
                    self.kind
                )));
            }
        }
        Ok(KindDescriptor {
            kind: self.kind,
            codec,
            default_view_range: self.default_view_range,
        })
    }
}

impl<T> KindDescriptorBuilder<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    /// Shorthand for `.codec(JsonCodec::new())`.
    pub fn json(self) -> Self {
        self.codec(JsonCodec::<T>::new())
    }
}

/// Type-erased per-kind operations the host drives every tick.
pub trait ReplicatedKind: Send + Sync {
    fn kind(&self) -> &KindId;

    fn tick_server(&self) -> TickReport;

    fn tick_client(&self) -> TickReport;

    fn reconcile(
        &mut self,
        tick: u64,
        observers: &[ObserverSnapshot],
        transport: &dyn ObserverTransport,
    ) -> ReconcileReport;

    fn apply_event(&self, event: &ReplicationEvent) -> Result<ClientApply, ReplicaError>;

    fn forget_observer(&mut self, observer: &ObserverId);

    fn clear(&mut self);

    fn clear_client(&self);

    fn as_any(&self) -> &dyn Any;
}

/// A kind's object set, replicator and codec.
pub struct ReplicatedSet<T: ObjectKind> {
    descriptor: KindDescriptor<T>,
    objects: Arc<ManagedObjectSet<T>>,
    replicator: InterestReplicator,
}

impl<T: ObjectKind> ReplicatedSet<T> {
    pub fn new(descriptor: KindDescriptor<T>, host_range: f64) -> Self {
        let range = descriptor.default_view_range.unwrap_or(host_range);
        Self {
            objects: Arc::new(ManagedObjectSet::new(descriptor.kind.clone())),
            replicator: InterestReplicator::new(descriptor.kind.clone(), range),
            descriptor,
        }
    }

    pub fn objects(&self) -> &Arc<ManagedObjectSet<T>> {
        &self.objects
    }

    pub fn replicator(&self) -> &InterestReplicator {
        &self.replicator
    }
}

impl<T: ObjectKind> ReplicatedKind for ReplicatedSet<T> {
    fn kind(&self) -> &KindId {
        &self.descriptor.kind
    }

    fn tick_server(&self) -> TickReport {
        self.objects.tick_all()
    }

    fn tick_client(&self) -> TickReport {
        self.objects.tick_client()
    }

    fn reconcile(
        &mut self,
        tick: u64,
        observers: &[ObserverSnapshot],
        transport: &dyn ObserverTransport,
    ) -> ReconcileReport {
        self.replicator.reconcile(
            tick,
            &self.objects,
            observers,
            self.descriptor.codec.as_ref(),
            transport,
        )
    }

    fn apply_event(&self, event: &ReplicationEvent) -> Result<ClientApply, ReplicaError> {
        self.objects.apply_inbound(event, self.descriptor.codec.as_ref())
    }

    fn forget_observer(&mut self, observer: &ObserverId) {
        self.replicator.forget_observer(observer);
    }

    fn clear(&mut self) {
        self.objects.clear();
        self.replicator.clear();
    }

    fn clear_client(&self) {
        self.objects.clear_client();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Explicit `KindId -> kind` table, iterated in registration order.
#[derive(Default)]
pub struct KindRegistry {
    kinds: Vec<Box<dyn ReplicatedKind>>,
    index: HashMap<KindId, usize>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a kind and returns its object set.
    ///
    /// `host_range` applies when the descriptor carries no range of its own.
    pub fn register<T: ObjectKind>(
        &mut self,
        descriptor: KindDescriptor<T>,
        host_range: f64,
    ) -> Result<Arc<ManagedObjectSet<T>>, ReplicaError> {
        if self.index.contains_key(descriptor.kind()) {
            return Err(ReplicaError::configuration(format!(
                "kind '{}' is already registered",
                descriptor.kind()
            )));
        }

        let set = ReplicatedSet::new(descriptor, host_range);
        let objects = Arc::clone(set.objects());
        info!(kind = %set.kind(), range = set.replicator().default_range(), "Registered kind");

        self.index.insert(set.kind().clone(), self.kinds.len());
        self.kinds.push(Box::new(set));
        Ok(objects)
    }

    /// Typed access to a registered kind's object set.
    pub fn objects<T: ObjectKind>(&self, kind: &KindId) -> Option<Arc<ManagedObjectSet<T>>> {
        let slot = *self.index.get(kind)?;
        self.kinds[slot]
            .as_any()
            .downcast_ref::<ReplicatedSet<T>>()
            .map(|set| Arc::clone(set.objects()))
    }

    pub fn get(&self, kind: &KindId) -> Option<&dyn ReplicatedKind> {
        self.index.get(kind).map(|slot| self.kinds[*slot].as_ref())
    }

    pub fn contains(&self, kind: &KindId) -> bool {
        self.index.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn ReplicatedKind> {
        self.kinds.iter().map(|kind| kind.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn ReplicatedKind>> {
        self.kinds.iter_mut()
    }

    /// Decodes one inbound frame and applies it to its kind's client view.
    pub fn apply_frame(&self, bytes: &[u8]) -> Result<ClientApply, ReplicaError> {
        let event = ReplicationEvent::decode(bytes)
            .map_err(|e| ReplicaError::decode(&KindId::from("frame"), e))?;
        self.apply_event(&event)
    }

    pub fn apply_event(&self, event: &ReplicationEvent) -> Result<ClientApply, ReplicaError> {
        match self.get(&event.kind) {
            Some(kind) => kind.apply_event(event),
            None => {
                warn!(kind = %event.kind, object = %event.object, "Frame for unregistered kind dropped");
                Err(ReplicaError::decode(&event.kind, "kind is not registered"))
            }
        }
    }
}

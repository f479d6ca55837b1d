//! Replica Core - tick-driven, interest-managed object replication
//!
//! One logical tick thread drives five components, leaves first:
//! 1. **Tick Scheduler**: countdown-based one-shot and repeating tasks
//! 2. **Sequenced Animator**: chains of timed nodes with inter-node delays
//! 3. **Path Motion Registry**: pure per-tick displacement of live targets
//! 4. **Managed Object Set**: authoritative and client views per object kind
//! 5. **Interest Replicator**: range-gated Spawn / Sync / Remove per observer
//!
//! `ReplicaHost` owns one of each (no process-wide state) and runs them in
//! that order every tick against the collaborators from `replica_env`.

pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod host_runtime;
pub mod interest;
pub mod managed;
pub mod metrics;
pub mod path_motion;
pub mod registry;
pub mod scheduler;
pub mod sequence;
pub mod session;

mod sync;

// Re-export key types for convenience
pub use codec::{Codec, JsonCodec};
pub use config::ReplicaConfig;
pub use error::{CodecError, ReplicaError};
pub use frame::{ReplicationAction, ReplicationEvent};
pub use host_runtime::{ReplicaHost, TickSummary};
pub use interest::{InterestReplicator, ReconcileReport};
pub use managed::{
    ClientApply, DirtyFlag, ManagedObjectSet, ObjectHandle, ObjectKind, Teleport, TickOutcome, TickReport,
};
pub use metrics::{MetricsSnapshot, ReplicationMetrics};
pub use path_motion::{displacement, MotionHandle, MotionTarget, PathMotion, PathMotionRegistry};
pub use registry::{KindDescriptor, KindDescriptorBuilder, KindRegistry, ReplicatedKind, ReplicatedSet};
pub use scheduler::{Schedule, SchedulerHandle, TaskBuilder, TaskHandle, TaskProgress, TickScheduler};
pub use sequence::{AnimationChain, CallbackNode, RepeatNode, SequenceNode, WaitNode};
pub use session::{ObserverSessions, ShakeEffect};

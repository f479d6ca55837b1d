//! Replica Deterministic Simulation Testing (DST) Harness
//!
//! This crate runs a complete `ReplicaHost` and one client per observer
//! inside a single thread, with every source of non-determinism replaced:
//! - **Time**: `SimClock` ticks only when asked, never sleeps
//! - **Network**: `SimTransport` logs every send; links can be cut or made lossy
//! - **Randomness**: all entropy derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ ReplicaHost (scheduler, kinds, motions, replicator)  │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │ send                          ▲ enumerate_near      │
//! │  ┌────▼─────────┐  wire log   ┌───────┴──────┐              │
//! │  │ SimTransport │────────────►│ ProtocolAudit│              │
//! │  └────┬─────────┘             └──────────────┘              │
//! │       │ drain            ┌──────────────┐                   │
//! │  ┌────▼────┐ ┌────────┐  │ SimDirectory │◄─── Oracle        │
//! │  │ Client  │ │ Client │  └──────────────┘   (walkers)       │
//! │  │   #1    │ │   #2   │ ...                                 │
//! │  └─────────┘ └────────┘                                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use replica_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).with_ticks(200).run(ScenarioId::Crowd);
//! assert!(result.passed);
//! ```

mod audit;
mod context;
mod directory;
mod kinds;
mod network;
mod oracle;
mod runner;
mod world;
pub mod scenarios;

pub use audit::ProtocolAudit;
pub use context::SimClock;
pub use directory::SimDirectory;
pub use kinds::{beacon_descriptor, flare_descriptor, Beacon, Flare, BEACON, FLARE};
pub use network::{SendOutcome, SimLinkController, SimTransport, WireRecord};
pub use oracle::{Oracle, Walker};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use world::{Divergence, ObserverClient, SimConfig, SimWorld, StepReport};

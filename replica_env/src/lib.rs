//! Replica Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seam between the replication core and
//! the outside world. The core never touches sockets, wall-clock time or
//! observer bookkeeping directly; it only sees four narrow capabilities:
//!
//! - **Transport**: send opaque bytes to one observer (`ObserverTransport`)
//! - **Directory**: enumerate observers near a point (`ObserverDirectory`)
//! - **Clock**: report the current logical tick (`TickClock`)
//! - **Frames**: wait for the next fixed-rate frame (`FrameClock`, host loop only)
//!
//! Production hosts use the tokio-backed implementations in this crate; the
//! simulation harness swaps in deterministic ones.
//!
//! # Example
//!
//! ```ignore
//! use replica_env::{FrameClock, TokioFrameClock};
//!
//! async fn host_loop<C: FrameClock>(clock: &C) {
//!     loop {
//!         clock.next_frame().await;
//!         tick(clock.current_tick());
//!     }
//! }
//! ```

mod context;
mod network;
mod types;
mod error;
mod local;
mod tokio_impl;

pub use context::{FrameClock, TickClock};
pub use network::{ObserverDirectory, ObserverTransport};
pub use types::{KindId, ObjectId, ObserverId, ObserverSnapshot};
pub use error::EnvError;
pub use local::{ManualClock, StaticDirectory};
pub use tokio_impl::{ChannelTransport, TokioFrameClock};

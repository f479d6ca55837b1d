//! Replica Host Demo - one orbiting lamp, one observer, real tokio channels
//!
//! The lamp circles the origin on a path motion while a scheduled task
//! cycles its color. The observer sits on the orbit, so it sees the lamp
//! Spawn as it comes close, Sync while it passes, and Remove as it leaves.
//!
//! Run: `RUST_LOG=info cargo run --example host_demo`

use nalgebra::Point3;
use replica_core::{
    displacement, KindDescriptor, ObjectKind, ReplicaConfig, ReplicaHost, ReplicationAction, ReplicationEvent,
    Schedule, Teleport, TickOutcome,
};
use replica_env::{ChannelTransport, ObserverId, StaticDirectory, TokioFrameClock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

// ============================================================================
// LAMP KIND
// ============================================================================

const COLORS: [&str; 3] = ["red", "green", "blue"];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Lamp {
    position: [f64; 3],
    color: String,
}

impl ObjectKind for Lamp {
    fn tick(&mut self) -> TickOutcome {
        TickOutcome::Unchanged
    }

    fn position(&self) -> Point3<f64> {
        Point3::from(self.position)
    }
}

impl Teleport for Lamp {
    fn teleport(&mut self, position: Point3<f64>) {
        self.position = [position.x, position.y, position.z];
    }
}

// ============================================================================
// MAIN
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let transport = Arc::new(ChannelTransport::new());
    let directory = Arc::new(StaticDirectory::new());
    let mut host = ReplicaHost::new(Arc::clone(&transport), Arc::clone(&directory), ReplicaConfig::default())?;

    let lamps = host.register_kind(
        KindDescriptor::<Lamp>::builder("lamp")
            .json()
            .default_view_range(16.0)
            .build()?,
    )?;

    // Observer parked on the orbit
    let observer = ObserverId::from_seed(1);
    directory.upsert(observer, Point3::new(30.0, 0.0, 0.0));
    let mut inbox = transport.connect(observer);

    // Lamp orbits the origin, radius 30, one lap every 40 ticks
    let lamp = lamps.spawn_server(Lamp {
        position: [0.0; 3],
        color: COLORS[0].to_string(),
    });
    host.attach_path(&lamp, displacement::circle(30.0, 40));

    let recolor = lamp.clone();
    let mut next = 0;
    host.scheduler_handle().schedule_repeating(7, move || {
        next = (next + 1) % COLORS.len();
        recolor.update(|l| l.color = COLORS[next].to_string());
    });

    // Print what the observer receives
    let printer = tokio::spawn(async move {
        while let Some(frame) = inbox.recv().await {
            match ReplicationEvent::decode(&frame) {
                Ok(event) => match event.action {
                    ReplicationAction::Spawn { .. } => println!("tick {:>3}  SPAWN  {}", event.tick, event.object),
                    ReplicationAction::Sync { .. } => println!("tick {:>3}  sync   {}", event.tick, event.object),
                    ReplicationAction::Remove => println!("tick {:>3}  REMOVE {}", event.tick, event.object),
                },
                Err(e) => eprintln!("bad frame: {e}"),
            }
        }
    });

    // Stop after two laps
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(4)).await;
        let _ = shutdown_tx.send(true);
    });

    let ticks = host.run(TokioFrameClock::shared(host.config().tick_rate_hz), shutdown_rx).await;
    host.shutdown();
    transport.close();
    printer.await?;

    let metrics = host.metrics().snapshot();
    println!(
        "{} ticks: {} spawns, {} syncs, {} removes",
        ticks, metrics.spawns, metrics.syncs, metrics.removes
    );
    Ok(())
}

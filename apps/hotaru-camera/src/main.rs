//! Hotaru Camera Binary
//!
//! Runs the full relay pipeline against the simulated event camera: open,
//! configure, stream for a while with per-interval rate summaries, then
//! tear down and report totals. A hardware deployment swaps the simulated
//! camera for an `EventCamera` implementation over the vendor SDK; nothing
//! else changes.
//!
//! ## Usage
//!
//! ```bash
//! # Stream for ten seconds through the worker hand-off (the default)
//! HOTARU_RUN_SECS=10 hotaru-camera
//!
//! # Publish inline from the device callback instead
//! HOTARU_USE_WORKER=0 hotaru-camera
//!
//! # Load biases at startup and persist them again on shutdown
//! HOTARU_BIAS_FILE=/var/lib/hotaru/cam.bias hotaru-camera
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use hotaru::sim::{SimCamera, SimCameraConfig};
use hotaru::{DeviceSession, EventRecord, EventSink, SessionConfig};

/// Demo configuration from environment variables.
struct Config {
    session: SessionConfig,
    /// How long to stream before shutting down.
    run_secs: f64,
    /// Records per synthesized delivery.
    sim_events_per_batch: usize,
    /// Pause between synthesized deliveries.
    sim_interval_ms: u64,
}

impl Config {
    fn from_env() -> Self {
        let mut session = SessionConfig::default();

        // Worker hand-off enabled by default, disable with HOTARU_USE_WORKER=0
        session.use_worker_thread = std::env::var("HOTARU_USE_WORKER")
            .map(|v| v != "0")
            .unwrap_or(true);

        session.stats_interval_secs = std::env::var("HOTARU_STATS_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(session.stats_interval_secs);

        session.bias_file = std::env::var("HOTARU_BIAS_FILE").ok().map(PathBuf::from);

        session.serial = std::env::var("HOTARU_SERIAL").ok().filter(|s| !s.is_empty());

        if let Ok(mode) = std::env::var("HOTARU_SYNC_MODE") {
            session.sync_mode = mode;
        }

        session.queue_capacity = std::env::var("HOTARU_QUEUE_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(session.queue_capacity);

        session.batch_capacity = std::env::var("HOTARU_BATCH_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(session.batch_capacity);

        session.pool_buffers = std::env::var("HOTARU_POOL_BUFFERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(session.queue_capacity + 2);

        let run_secs: f64 = std::env::var("HOTARU_RUN_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5.0);

        let sim_events_per_batch: usize = std::env::var("HOTARU_SIM_BATCH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(512);

        let sim_interval_ms: u64 = std::env::var("HOTARU_SIM_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);

        Self {
            session,
            run_secs,
            sim_events_per_batch,
            sim_interval_ms,
        }
    }
}

/// Stand-in for a downstream publisher: tallies what crosses the sink.
struct TallySink {
    batches: Arc<AtomicU64>,
    events: Arc<AtomicU64>,
}

impl EventSink for TallySink {
    fn publish(&mut self, records: &[EventRecord]) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.events.fetch_add(records.len() as u64, Ordering::Relaxed);
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hotaru=info".parse().unwrap())
                .add_directive("hotaru_camera=info".parse().unwrap()),
        )
        .init();

    let config = Config::from_env();

    info!("Hotaru Camera starting");
    info!("  Sync mode: {}", config.session.sync_mode);
    info!(
        "  Hand-off: {}",
        if config.session.use_worker_thread {
            "worker thread"
        } else {
            "inline"
        }
    );
    info!("  Stats interval: {:.1}s", config.session.stats_interval_secs);
    info!("  Run duration: {:.1}s", config.run_secs);

    let camera = SimCamera::new(SimCameraConfig {
        events_per_batch: config.sim_events_per_batch,
        batch_interval: Duration::from_millis(config.sim_interval_ms),
        ..Default::default()
    });

    let mut session = DeviceSession::new(camera, config.session.clone());
    session
        .initialize()
        .context("camera initialization failed")?;

    let batches = Arc::new(AtomicU64::new(0));
    let events = Arc::new(AtomicU64::new(0));
    session
        .start(TallySink {
            batches: Arc::clone(&batches),
            events: Arc::clone(&events),
        })
        .context("could not start the relay")?;

    thread::sleep(Duration::from_secs_f64(config.run_secs.max(0.0)));

    session.stop();

    info!("Relay finished");
    info!("  Batches published: {}", batches.load(Ordering::Relaxed));
    info!("  Events published: {}", events.load(Ordering::Relaxed));
    if let Some(stats) = session.queue_stats() {
        info!(
            "  Queue: pushed {}, popped {}, dropped {}",
            stats.pushed, stats.popped, stats.dropped
        );
    }

    if config.session.bias_file.is_some() {
        session.save_biases();
    }

    Ok(())
}

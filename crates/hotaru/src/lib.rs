//! Hotaru - event camera relay pipeline
//!
//! Wraps an event camera behind a session with a deliberate lifecycle
//! (initialize → start → stop → drop) and moves event batches from the
//! device's delivery thread to a publishing sink. Two hand-off modes:
//!
//! - **Inline**: statistics and publish run directly in the device
//!   callback. No copies, no threads, but the sink stalls the device.
//! - **Worker**: the callback copies records into pre-allocated pool
//!   buffers and pushes them onto a bounded queue; a relay worker pops,
//!   aggregates statistics, and publishes. Overflow displaces the oldest
//!   batch so the device is never blocked.
//!
//! The `sim` feature (always on for tests) adds a synthetic camera, so the
//! whole pipeline runs without hardware.

mod config;
mod device;
mod error;
mod event;
mod pool;
mod queue;
mod session;
mod sink;
mod stats;
mod worker;

pub use config::{SessionConfig, SyncMode};
pub use device::{
    CallbackId, CameraSelector, CameraStatus, ErrorCallback, EventCallback, EventCamera,
    StatusCallback, SyncRole,
};
pub use error::{BiasError, DeviceError, InitError, StartError};
pub use event::EventRecord;
pub use pool::{BufferPool, EventBatch};
pub use queue::{QueueStats, TransferQueue};
pub use session::{DeviceSession, SessionState};
pub use sink::EventSink;
pub use stats::{FlushSummary, StatisticsAggregator};
pub use worker::RelayWorker;

// Synthetic camera: generator thread, in-memory bias table
#[cfg(any(test, feature = "sim"))]
pub mod sim;

//! Session configuration
//!
//! Plain structs with defaults; loading them from the environment or a
//! launch system is the embedding application's business. The sync mode is
//! kept as the configured string and validated during `initialize`, so a
//! bad value surfaces as an `InitError` rather than at config-build time.

use std::fmt;
use std::path::PathBuf;

use crate::device::SyncRole;

/// Configuration for a [`DeviceSession`](crate::DeviceSession).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Hand events to a dedicated relay worker thread instead of publishing
    /// inline from the device callback.
    pub use_worker_thread: bool,
    /// Statistics summary cadence, in seconds of device time.
    pub stats_interval_secs: f64,
    /// Bias file to load at initialize and to write on `save_biases`.
    pub bias_file: Option<PathBuf>,
    /// Open this serial number; `None` opens the first available device.
    pub serial: Option<String>,
    /// `"standalone"`, `"primary"`, or `"secondary"`.
    pub sync_mode: String,
    /// Worker mode: maximum queued batches before the oldest is displaced.
    pub queue_capacity: usize,
    /// Worker mode: records per pool buffer (device deliveries larger than
    /// this are split into several batches).
    pub batch_capacity: usize,
    /// Worker mode: total pre-allocated buffers. Defaults to the queue
    /// capacity plus one buffer in flight on each side.
    pub pool_buffers: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            use_worker_thread: false,
            stats_interval_secs: 1.0,
            bias_file: None,
            serial: None,
            sync_mode: SyncMode::Standalone.name().to_string(),
            queue_capacity: 64,
            batch_capacity: 8192,
            pool_buffers: 66,
        }
    }
}

/// Validated multi-camera synchronization mode.
///
/// The names are user-facing; the device speaks [`SyncRole`], where primary
/// maps to master and secondary to slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Standalone,
    Primary,
    Secondary,
}

impl SyncMode {
    /// Parse a configured mode string. Returns `None` for anything other
    /// than the three recognized names.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "standalone" => Some(Self::Standalone),
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    /// The device-side role this mode configures.
    pub fn role(self) -> SyncRole {
        match self {
            Self::Standalone => SyncRole::Standalone,
            Self::Primary => SyncRole::Master,
            Self::Secondary => SyncRole::Slave,
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

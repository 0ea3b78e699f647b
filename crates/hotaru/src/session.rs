//! Camera session lifecycle
//!
//! Owns the device connection and the relay pipeline around it: opening and
//! configuring the camera, registering the device callbacks, starting and
//! stopping the worker, and mediating bias reads/writes off the hot path.
//! The session walks Uninitialized → Initialized → Running → Stopped;
//! `stop` is idempotent and also runs from `Drop`, so teardown is safe from
//! any state, including while the worker is blocked in the queue wait.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::config::{SessionConfig, SyncMode};
use crate::device::{CallbackId, CameraSelector, CameraStatus, EventCamera};
use crate::error::{BiasError, InitError, StartError};
use crate::event::EventRecord;
use crate::pool::BufferPool;
use crate::queue::{QueueStats, TransferQueue};
use crate::sink::EventSink;
use crate::stats::StatisticsAggregator;
use crate::worker::RelayWorker;

/// Bias parameters this system never writes; requested changes are logged
/// and echoed back unchanged.
const PROTECTED_BIASES: &[&str] = &["bias_diff"];

/// Where a session is in its lifecycle. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

/// Inline-mode publication state. The event callback is registered at
/// `initialize` but the sink only arrives at `start`, so the pair is handed
/// across through this slot; the lock is uncontended once running.
struct InlineState {
    stats: StatisticsAggregator,
    sink: Box<dyn EventSink>,
}

type InlineSlot = Mutex<Option<InlineState>>;

/// Lifecycle and bias control for one event camera.
pub struct DeviceSession<C: EventCamera> {
    config: SessionConfig,
    camera: C,
    state: SessionState,
    serial: String,
    geometry: (u16, u16),
    status_cb: Option<CallbackId>,
    error_cb: Option<CallbackId>,
    event_cb: Option<CallbackId>,
    queue: Option<Arc<TransferQueue>>,
    pool: Option<BufferPool>,
    inline_slot: Option<Arc<InlineSlot>>,
    worker: Option<JoinHandle<()>>,
}

impl<C: EventCamera> DeviceSession<C> {
    pub fn new(camera: C, config: SessionConfig) -> Self {
        Self {
            config,
            camera,
            state: SessionState::Uninitialized,
            serial: String::new(),
            geometry: (0, 0),
            status_cb: None,
            error_cb: None,
            event_cb: None,
            queue: None,
            pool: None,
            inline_slot: None,
            worker: None,
        }
    }

    /// Open and configure the camera and register all callbacks. On any
    /// failure the session stays `Uninitialized` with no partial state:
    /// whatever was registered before the failure is unregistered again and
    /// the device connection is released, so a retry starts from scratch.
    pub fn initialize(&mut self) -> Result<(), InitError> {
        if self.state != SessionState::Uninitialized {
            return Err(InitError::AlreadyInitialized);
        }
        let sync_mode = SyncMode::from_name(&self.config.sync_mode)
            .ok_or_else(|| InitError::InvalidSyncMode(self.config.sync_mode.clone()))?;
        if let Err(e) = self.initialize_camera(sync_mode) {
            error!(error = %e, "could not initialize camera");
            self.unwind_partial_init();
            return Err(e);
        }
        self.state = SessionState::Initialized;
        Ok(())
    }

    fn initialize_camera(&mut self, sync_mode: SyncMode) -> Result<(), InitError> {
        let selector = match &self.config.serial {
            Some(serial) => CameraSelector::Serial(serial.clone()),
            None => CameraSelector::FirstAvailable,
        };
        self.camera.open(&selector).map_err(InitError::Open)?;

        if let Some(path) = &self.config.bias_file {
            if let Err(e) = self.camera.load_biases(path) {
                warn!(file = %path.display(), error = %e, "reading bias file failed");
                warn!("continuing with default biases");
            }
        } else {
            info!("no bias file provided, using camera defaults");
        }

        // The selector may have been "first available"; keep what actually
        // opened.
        self.serial = self.camera.serial().to_string();
        info!(serial = %self.serial, "camera serial number");
        self.geometry = self.camera.geometry();
        info!(width = self.geometry.0, height = self.geometry.1, "sensor geometry");

        self.camera
            .set_sync_role(sync_mode.role())
            .map_err(InitError::Setup)?;

        let status_cb = self
            .camera
            .add_status_callback(Box::new(|status| {
                shielded("status", || match status {
                    CameraStatus::Started => info!("camera started"),
                    CameraStatus::Stopped => info!("camera stopped"),
                });
            }))
            .map_err(InitError::Setup)?;
        self.status_cb = Some(status_cb);

        let error_cb = self
            .camera
            .add_error_callback(Box::new(|e| {
                shielded("runtime-error", || error!(error = %e, "camera runtime error"));
            }))
            .map_err(InitError::Setup)?;
        self.error_cb = Some(error_cb);

        let event_cb = if self.config.use_worker_thread {
            let pool = BufferPool::new(self.config.pool_buffers, self.config.batch_capacity);
            let queue = Arc::new(TransferQueue::new(self.config.queue_capacity));
            let cb_pool = pool.clone();
            let cb_queue = Arc::clone(&queue);
            self.pool = Some(pool);
            self.queue = Some(queue);
            self.camera
                .add_event_callback(Box::new(move |records: &[EventRecord]| {
                    shielded("event", || queued_ingest(&cb_pool, &cb_queue, records));
                }))
                .map_err(InitError::Setup)?
        } else {
            let slot: Arc<InlineSlot> = Arc::new(Mutex::new(None));
            let cb_slot = Arc::clone(&slot);
            self.inline_slot = Some(slot);
            self.camera
                .add_event_callback(Box::new(move |records: &[EventRecord]| {
                    shielded("event", || inline_ingest(&cb_slot, records));
                }))
                .map_err(InitError::Setup)?
        };
        self.event_cb = Some(event_cb);

        info!(
            sync_mode = %sync_mode,
            worker = self.config.use_worker_thread,
            "camera session initialized"
        );
        Ok(())
    }

    /// Undo a half-finished `initialize` so nothing stays registered.
    fn unwind_partial_init(&mut self) {
        if let Some(id) = self.event_cb.take() {
            self.camera.remove_event_callback(id);
        }
        if let Some(id) = self.error_cb.take() {
            self.camera.remove_error_callback(id);
        }
        if let Some(id) = self.status_cb.take() {
            self.camera.remove_status_callback(id);
        }
        // The open itself may have been the failure; close is safe then.
        self.camera.close();
        self.queue = None;
        self.pool = None;
        self.inline_slot = None;
        self.serial.clear();
        self.geometry = (0, 0);
    }

    /// Begin producing. In worker mode the relay thread is spawned before
    /// the device starts, so the consumer is ready before the first push;
    /// if the device then refuses to start, the worker is shut down and
    /// joined before the error is returned.
    pub fn start<S: EventSink + 'static>(&mut self, sink: S) -> Result<(), StartError> {
        if self.state != SessionState::Initialized {
            return Err(StartError::NotInitialized);
        }
        let stats = StatisticsAggregator::new(self.config.stats_interval_secs);

        if self.config.use_worker_thread {
            let (queue, pool) = match (&self.queue, &self.pool) {
                (Some(queue), Some(pool)) => (Arc::clone(queue), pool.clone()),
                _ => return Err(StartError::NotInitialized),
            };
            let worker = RelayWorker::new(queue, pool, stats, sink);
            let handle = thread::Builder::new()
                .name("hotaru-relay".into())
                .spawn(move || worker.run())
                .map_err(StartError::Worker)?;
            self.worker = Some(handle);

            if let Err(e) = self.camera.start() {
                if let Some(queue) = &self.queue {
                    queue.shutdown();
                }
                self.join_worker();
                if let Some(queue) = &self.queue {
                    // The event callback holds its own handle to this
                    // queue, so the same queue must serve a retried
                    // `start`; clear the shutdown flag it just absorbed.
                    queue.drain();
                    queue.reopen();
                }
                return Err(StartError::Device(e));
            }
        } else {
            if let Some(slot) = &self.inline_slot {
                *slot.lock() = Some(InlineState {
                    stats,
                    sink: Box::new(sink),
                });
            }
            if let Err(e) = self.camera.start() {
                if let Some(slot) = &self.inline_slot {
                    *slot.lock() = None;
                }
                return Err(StartError::Device(e));
            }
        }

        self.state = SessionState::Running;
        info!("event relay running");
        Ok(())
    }

    /// Tear the pipeline down. Returns whether a running camera was
    /// actually stopped. Safe to call repeatedly and from any state; the
    /// camera stops first so no callback fires into a dismantled pipeline,
    /// then each callback is unregistered at most once, then the worker is
    /// woken through the queue lock and joined.
    pub fn stop(&mut self) -> bool {
        let mut stopped = false;
        if self.camera.is_running() {
            match self.camera.stop() {
                Ok(()) => stopped = true,
                Err(e) => warn!(error = %e, "camera stop failed"),
            }
        }
        if let Some(id) = self.event_cb.take() {
            self.camera.remove_event_callback(id);
        }
        if let Some(id) = self.error_cb.take() {
            self.camera.remove_error_callback(id);
        }
        if let Some(id) = self.status_cb.take() {
            self.camera.remove_status_callback(id);
        }
        if let Some(queue) = &self.queue {
            queue.shutdown();
        }
        self.join_worker();
        if let Some(queue) = &self.queue {
            // The worker drains on exit; this covers a worker that never
            // ran.
            queue.drain();
        }
        if let Some(slot) = &self.inline_slot {
            *slot.lock() = None;
        }
        if matches!(self.state, SessionState::Initialized | SessionState::Running) {
            self.state = SessionState::Stopped;
            info!("camera session stopped");
        }
        stopped
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("relay worker panicked");
            }
        }
    }

    /// Read a bias parameter from the device.
    pub fn get_bias(&self, name: &str) -> Result<i32, BiasError> {
        match self.camera.bias(name) {
            Ok(value) => Ok(value),
            Err(e) => {
                error!(bias = name, error = %e, "unknown bias parameter");
                Err(BiasError::NotFound(name.to_string()))
            }
        }
    }

    /// Write a bias parameter and return the value that actually took
    /// hold, which may differ from `value`: the device's rounding or
    /// clamping is authoritative, so the parameter is read back after the
    /// write. Writes to protected parameters are logged no-ops that echo
    /// the requested value. A change is only logged when the effective
    /// value moved.
    pub fn set_bias(&mut self, name: &str, value: i32) -> Result<i32, BiasError> {
        if PROTECTED_BIASES.contains(&name) {
            warn!(bias = name, "ignoring change to protected parameter");
            return Ok(value);
        }
        let prev = self.get_bias(name)?;
        if value != prev {
            self.camera
                .set_bias(name, value)
                .map_err(BiasError::Device)?;
        }
        let applied = self.get_bias(name)?;
        if applied != prev {
            info!(
                bias = name,
                from = prev,
                requested = value,
                applied,
                "changed bias parameter"
            );
        }
        Ok(applied)
    }

    /// Persist current bias values to the configured bias file. Not having
    /// a file configured, or failing to write it, is a warning and `false`,
    /// never an error.
    pub fn save_biases(&self) -> bool {
        let Some(path) = &self.config.bias_file else {
            warn!("no bias file specified at startup, no biases saved");
            return false;
        };
        match self.camera.save_biases(path) {
            Ok(()) => {
                info!(file = %path.display(), "biases written to file");
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to write bias file");
                false
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Serial number of the opened camera (empty before `initialize`).
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Sensor geometry recorded at `initialize`.
    pub fn geometry(&self) -> (u16, u16) {
        self.geometry
    }

    /// Queue counters, when running in worker mode.
    pub fn queue_stats(&self) -> Option<QueueStats> {
        self.queue.as_ref().map(|queue| queue.stats())
    }

    /// The underlying camera, for direct device access outside the
    /// session's own operations.
    pub fn camera(&self) -> &C {
        &self.camera
    }
}

impl<C: EventCamera> Drop for DeviceSession<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Worker-mode ingest: copy the delivery into pool buffers, split at buffer
/// capacity, and hand each chunk to the queue. Runs on the device's
/// delivery thread; nothing here blocks beyond the queue mutex, and an
/// empty pool sheds the remainder of the delivery (counted by the pool).
fn queued_ingest(pool: &BufferPool, queue: &TransferQueue, records: &[EventRecord]) {
    let mut rest = records;
    while !rest.is_empty() {
        let Some(mut batch) = pool.acquire() else {
            return;
        };
        let taken = batch.extend_from_slice(rest);
        rest = &rest[taken..];
        queue.push(batch);
    }
}

/// Inline ingest: statistics and publish run right in the device callback.
fn inline_ingest(slot: &InlineSlot, records: &[EventRecord]) {
    if records.is_empty() {
        return;
    }
    let mut state = slot.lock();
    if let Some(state) = state.as_mut() {
        if !state.sink.keep_running() {
            return;
        }
        if let Some(summary) = state.stats.update(records) {
            info!("{summary}");
        }
        state.sink.publish(records);
    }
}

/// Boundary for code invoked from the device's threads: a panic must never
/// unwind into the driver, so it becomes an error log and a no-op return.
fn shielded(context: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(callback = context, "panic in device callback suppressed");
    }
}

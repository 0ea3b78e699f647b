//! Simulated event camera
//!
//! A hardware-free [`EventCamera`] for tests and demos. A generator thread
//! synthesizes a raster sweep with alternating polarity at a configurable
//! cadence and drives the registered event callbacks the same way a device
//! delivery thread would: from its own thread, holding nothing but the
//! callback table lock. Bias parameters live in an in-memory table with
//! device-style clamping and a plain `value name` file format.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::device::{
    CallbackId, CameraSelector, CameraStatus, ErrorCallback, EventCallback, EventCamera,
    StatusCallback, SyncRole,
};
use crate::error::DeviceError;
use crate::event::EventRecord;

/// One bias parameter: its current value plus the clamp range the simulated
/// device enforces on writes.
#[derive(Debug, Clone)]
pub struct SimBias {
    pub name: String,
    pub value: i32,
    pub min: i32,
    pub max: i32,
}

impl SimBias {
    pub fn new(name: impl Into<String>, value: i32, min: i32, max: i32) -> Self {
        Self {
            name: name.into(),
            value,
            min,
            max,
        }
    }
}

/// Shape of the synthetic event stream and the simulated device itself.
#[derive(Debug, Clone)]
pub struct SimCameraConfig {
    pub serial: String,
    pub width: u16,
    pub height: u16,
    /// Records per synthesized delivery.
    pub events_per_batch: usize,
    /// Wall-clock pause between deliveries.
    pub batch_interval: Duration,
    /// Device-time distance between consecutive records, in microseconds.
    pub timestamp_step_us: i64,
    pub biases: Vec<SimBias>,
    /// Make the first N `start` calls fail, for error-path tests.
    pub fail_starts: u32,
    /// Make the first N `add_event_callback` calls fail.
    pub fail_event_callbacks: u32,
}

impl Default for SimCameraConfig {
    fn default() -> Self {
        Self {
            serial: "sim-00001".to_string(),
            width: 640,
            height: 480,
            events_per_batch: 512,
            batch_interval: Duration::from_millis(1),
            timestamp_step_us: 2,
            biases: default_biases(),
            fail_starts: 0,
            fail_event_callbacks: 0,
        }
    }
}

fn default_biases() -> Vec<SimBias> {
    vec![
        SimBias::new("bias_diff", 300, 0, 1800),
        SimBias::new("bias_diff_off", 225, 0, 1800),
        SimBias::new("bias_diff_on", 375, 0, 1800),
        SimBias::new("bias_fo", 1725, 0, 1800),
        SimBias::new("bias_hpf", 1500, 0, 1800),
        SimBias::new("bias_pr", 1250, 0, 1800),
        SimBias::new("bias_refr", 1500, 0, 1800),
    ]
}

/// Callback tables shared with the generator thread.
#[derive(Default)]
struct Callbacks {
    event: Mutex<HashMap<u64, EventCallback>>,
    status: Mutex<HashMap<u64, StatusCallback>>,
    error: Mutex<HashMap<u64, ErrorCallback>>,
}

pub struct SimCamera {
    config: SimCameraConfig,
    opened: bool,
    sync_role: Option<SyncRole>,
    biases: BTreeMap<String, SimBias>,
    callbacks: Arc<Callbacks>,
    next_id: u64,
    running: Arc<AtomicBool>,
    generator: Option<JoinHandle<()>>,
    starts_to_fail: u32,
    event_callbacks_to_fail: u32,
    removal_calls: u64,
    bias_writes: u64,
}

impl SimCamera {
    pub fn new(config: SimCameraConfig) -> Self {
        let biases = config
            .biases
            .iter()
            .cloned()
            .map(|b| (b.name.clone(), b))
            .collect();
        let starts_to_fail = config.fail_starts;
        let event_callbacks_to_fail = config.fail_event_callbacks;
        Self {
            config,
            opened: false,
            sync_role: None,
            biases,
            callbacks: Arc::new(Callbacks::default()),
            next_id: 1,
            running: Arc::new(AtomicBool::new(false)),
            generator: None,
            starts_to_fail,
            event_callbacks_to_fail,
            removal_calls: 0,
            bias_writes: 0,
        }
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }

    /// Role configured through `set_sync_role`, if any.
    pub fn sync_role(&self) -> Option<SyncRole> {
        self.sync_role
    }

    /// Number of `remove_*_callback` calls seen, including calls that
    /// removed nothing.
    pub fn removal_calls(&self) -> u64 {
        self.removal_calls
    }

    /// Number of accepted bias writes.
    pub fn bias_writes(&self) -> u64 {
        self.bias_writes
    }

    fn require_open(&self) -> Result<(), DeviceError> {
        if self.opened {
            Ok(())
        } else {
            Err(DeviceError::new("camera is not open"))
        }
    }

    fn fresh_id(&mut self) -> CallbackId {
        let id = CallbackId::new(self.next_id);
        self.next_id += 1;
        id
    }
}

impl Default for SimCamera {
    fn default() -> Self {
        Self::new(SimCameraConfig::default())
    }
}

impl EventCamera for SimCamera {
    fn open(&mut self, selector: &CameraSelector) -> Result<(), DeviceError> {
        if self.opened {
            return Err(DeviceError::new("camera already open"));
        }
        if let CameraSelector::Serial(serial) = selector {
            if *serial != self.config.serial {
                return Err(DeviceError::new(format!("no device with serial {serial}")));
            }
        }
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.generator.take() {
            let _ = handle.join();
        }
        self.callbacks.event.lock().clear();
        self.callbacks.status.lock().clear();
        self.callbacks.error.lock().clear();
        self.opened = false;
        self.sync_role = None;
    }

    fn serial(&self) -> &str {
        &self.config.serial
    }

    fn geometry(&self) -> (u16, u16) {
        (self.config.width, self.config.height)
    }

    fn set_sync_role(&mut self, role: SyncRole) -> Result<(), DeviceError> {
        self.require_open()?;
        self.sync_role = Some(role);
        Ok(())
    }

    fn add_status_callback(&mut self, cb: StatusCallback) -> Result<CallbackId, DeviceError> {
        self.require_open()?;
        let id = self.fresh_id();
        self.callbacks.status.lock().insert(id.raw(), cb);
        Ok(id)
    }

    fn remove_status_callback(&mut self, id: CallbackId) {
        self.removal_calls += 1;
        self.callbacks.status.lock().remove(&id.raw());
    }

    fn add_error_callback(&mut self, cb: ErrorCallback) -> Result<CallbackId, DeviceError> {
        self.require_open()?;
        let id = self.fresh_id();
        self.callbacks.error.lock().insert(id.raw(), cb);
        Ok(id)
    }

    fn remove_error_callback(&mut self, id: CallbackId) {
        self.removal_calls += 1;
        self.callbacks.error.lock().remove(&id.raw());
    }

    fn add_event_callback(&mut self, cb: EventCallback) -> Result<CallbackId, DeviceError> {
        self.require_open()?;
        if self.event_callbacks_to_fail > 0 {
            self.event_callbacks_to_fail -= 1;
            return Err(DeviceError::new("simulated callback registration failure"));
        }
        let id = self.fresh_id();
        self.callbacks.event.lock().insert(id.raw(), cb);
        Ok(id)
    }

    fn remove_event_callback(&mut self, id: CallbackId) {
        self.removal_calls += 1;
        self.callbacks.event.lock().remove(&id.raw());
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        self.require_open()?;
        if self.starts_to_fail > 0 {
            self.starts_to_fail -= 1;
            return Err(DeviceError::new("simulated start failure"));
        }
        if self.generator.is_some() {
            return Ok(());
        }
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let callbacks = Arc::clone(&self.callbacks);
        let events_per_batch = self.config.events_per_batch.max(1);
        let interval = self.config.batch_interval;
        let step_us = self.config.timestamp_step_us.max(1);
        let width = u64::from(self.config.width.max(1));
        let height = u64::from(self.config.height.max(1));
        let spawned = thread::Builder::new().name("hotaru-sim".into()).spawn(move || {
            generate(running, callbacks, events_per_batch, interval, step_us, width, height)
        });
        match spawned {
            Ok(handle) => self.generator = Some(handle),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(DeviceError::new(format!("could not spawn generator: {e}")));
            }
        }
        for cb in self.callbacks.status.lock().values_mut() {
            cb(CameraStatus::Started);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.generator.take() {
            let _ = handle.join();
            for cb in self.callbacks.status.lock().values_mut() {
                cb(CameraStatus::Stopped);
            }
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.generator.is_some()
    }

    fn bias(&self, name: &str) -> Result<i32, DeviceError> {
        self.biases
            .get(name)
            .map(|b| b.value)
            .ok_or_else(|| DeviceError::new(format!("unknown bias parameter `{name}`")))
    }

    fn set_bias(&mut self, name: &str, value: i32) -> Result<(), DeviceError> {
        let Some(bias) = self.biases.get_mut(name) else {
            return Err(DeviceError::new(format!("unknown bias parameter `{name}`")));
        };
        bias.value = value.clamp(bias.min, bias.max);
        self.bias_writes += 1;
        Ok(())
    }

    fn biases(&self) -> Vec<(String, i32)> {
        self.biases
            .iter()
            .map(|(name, b)| (name.clone(), b.value))
            .collect()
    }

    fn load_biases(&mut self, path: &Path) -> Result<(), DeviceError> {
        let text = fs::read_to_string(path)
            .map_err(|e| DeviceError::new(format!("could not read bias file: {e}")))?;
        // Validate the whole file before applying anything, so a bad file
        // leaves the table untouched.
        let mut parsed = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('%') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(value), Some(name), None) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(DeviceError::new(format!(
                    "malformed bias line {}",
                    index + 1
                )));
            };
            let value: i32 = value.parse().map_err(|_| {
                DeviceError::new(format!("bad bias value on line {}", index + 1))
            })?;
            if !self.biases.contains_key(name) {
                return Err(DeviceError::new(format!(
                    "unknown bias parameter `{name}` on line {}",
                    index + 1
                )));
            }
            parsed.push((name.to_string(), value));
        }
        for (name, value) in parsed {
            if let Some(bias) = self.biases.get_mut(&name) {
                bias.value = value.clamp(bias.min, bias.max);
            }
        }
        Ok(())
    }

    fn save_biases(&self, path: &Path) -> Result<(), DeviceError> {
        let mut out = String::new();
        for (name, bias) in &self.biases {
            out.push_str(&format!("{} {}\n", bias.value, name));
        }
        fs::write(path, out).map_err(|e| DeviceError::new(format!("could not write bias file: {e}")))
    }
}

impl Drop for SimCamera {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Generator loop. Runs until the flag drops; `stop` joins it, so no
/// callback fires after `stop` returns.
fn generate(
    running: Arc<AtomicBool>,
    callbacks: Arc<Callbacks>,
    events_per_batch: usize,
    interval: Duration,
    step_us: i64,
    width: u64,
    height: u64,
) {
    let mut t: i64 = 0;
    let mut index: u64 = 0;
    let mut records = Vec::with_capacity(events_per_batch);
    while running.load(Ordering::SeqCst) {
        thread::sleep(interval);
        if !running.load(Ordering::SeqCst) {
            break;
        }
        records.clear();
        for _ in 0..events_per_batch {
            let x = (index % width) as u16;
            let y = ((index / width) % height) as u16;
            let p = (index % 2) as u8;
            records.push(EventRecord::new(t, x, y, p));
            t += step_us;
            index += 1;
        }
        for cb in callbacks.event.lock().values_mut() {
            cb(&records);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use tempfile::TempDir;

    fn opened() -> SimCamera {
        let mut camera = SimCamera::default();
        camera.open(&CameraSelector::FirstAvailable).unwrap();
        camera
    }

    // ========== enumeration and lifecycle ==========

    #[test]
    fn open_adopts_the_configured_serial() {
        let mut camera = SimCamera::default();
        assert!(!camera.is_opened());
        camera.open(&CameraSelector::FirstAvailable).unwrap();
        assert!(camera.is_opened());
        assert_eq!(camera.serial(), "sim-00001");
        assert_eq!(camera.geometry(), (640, 480));
    }

    #[test]
    fn open_by_serial_must_match() {
        let mut camera = SimCamera::default();
        camera
            .open(&CameraSelector::Serial("sim-00001".into()))
            .unwrap();

        let mut other = SimCamera::default();
        assert!(other
            .open(&CameraSelector::Serial("sim-99999".into()))
            .is_err());
        assert!(!other.is_opened());
    }

    #[test]
    fn start_requires_open() {
        let mut camera = SimCamera::default();
        assert!(camera.start().is_err());
        assert!(!camera.is_running());
    }

    #[test]
    fn close_releases_the_camera_for_a_fresh_open() {
        let mut camera = opened();
        camera
            .add_event_callback(Box::new(|_records| {}))
            .unwrap();
        camera.start().unwrap();

        camera.close();
        assert!(!camera.is_opened());
        assert!(!camera.is_running());
        assert_eq!(camera.sync_role(), None);

        // A closed camera opens again; a never-opened one closes safely.
        camera.open(&CameraSelector::FirstAvailable).unwrap();
        assert!(camera.is_opened());
        let mut fresh = SimCamera::default();
        fresh.close();
        assert!(!fresh.is_opened());
    }

    #[test]
    fn no_delivery_after_stop_returns() {
        let mut camera = opened();
        let count = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&count);
        camera
            .add_event_callback(Box::new(move |records| {
                seen.fetch_add(records.len() as u64, Ordering::SeqCst);
            }))
            .unwrap();

        camera.start().unwrap();
        thread::sleep(Duration::from_millis(30));
        camera.stop().unwrap();

        let frozen = count.load(Ordering::SeqCst);
        assert!(frozen > 0, "generator never delivered");
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), frozen);
    }

    #[test]
    fn timestamps_increase_across_batches() {
        let mut camera = opened();
        let ok = Arc::new(AtomicBool::new(true));
        let last = Arc::new(Mutex::new(i64::MIN));
        let cb_ok = Arc::clone(&ok);
        let cb_last = Arc::clone(&last);
        camera
            .add_event_callback(Box::new(move |records| {
                let mut last = cb_last.lock();
                for record in records {
                    if record.t <= *last {
                        cb_ok.store(false, Ordering::SeqCst);
                    }
                    *last = record.t;
                }
            }))
            .unwrap();

        camera.start().unwrap();
        thread::sleep(Duration::from_millis(30));
        camera.stop().unwrap();

        assert!(*last.lock() > i64::MIN, "generator never delivered");
        assert!(ok.load(Ordering::SeqCst), "timestamps went backwards");
    }

    #[test]
    fn status_callbacks_bracket_the_run() {
        let mut camera = opened();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cb_seen = Arc::clone(&seen);
        camera
            .add_status_callback(Box::new(move |status| {
                cb_seen.lock().push(status);
            }))
            .unwrap();

        camera.start().unwrap();
        camera.stop().unwrap();

        assert_eq!(
            *seen.lock(),
            vec![CameraStatus::Started, CameraStatus::Stopped]
        );
    }

    #[test]
    fn removed_event_callback_no_longer_fires() {
        let mut camera = opened();
        let count = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&count);
        let id = camera
            .add_event_callback(Box::new(move |records| {
                seen.fetch_add(records.len() as u64, Ordering::SeqCst);
            }))
            .unwrap();

        camera.start().unwrap();
        thread::sleep(Duration::from_millis(20));
        camera.remove_event_callback(id);
        let frozen = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));

        assert_eq!(count.load(Ordering::SeqCst), frozen);
        assert_eq!(camera.removal_calls(), 1);
        camera.stop().unwrap();
    }

    // ========== biases ==========

    #[test]
    fn bias_writes_clamp_to_the_device_range() {
        let mut camera = opened();
        camera.set_bias("bias_fo", 9999).unwrap();
        assert_eq!(camera.bias("bias_fo").unwrap(), 1800);
        camera.set_bias("bias_fo", -5).unwrap();
        assert_eq!(camera.bias("bias_fo").unwrap(), 0);
        assert_eq!(camera.bias_writes(), 2);
    }

    #[test]
    fn unknown_bias_is_rejected() {
        let mut camera = opened();
        assert!(camera.bias("bias_nope").is_err());
        assert!(camera.set_bias("bias_nope", 1).is_err());
    }

    #[test]
    fn bias_file_survives_a_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cam.bias");

        let mut camera = opened();
        camera.set_bias("bias_diff_on", 400).unwrap();
        camera.set_bias("bias_hpf", 1000).unwrap();
        camera.save_biases(&path).unwrap();

        let mut fresh = opened();
        fresh.load_biases(&path).unwrap();
        assert_eq!(fresh.biases(), camera.biases());
    }

    #[test]
    fn bias_file_ignores_comments_and_blank_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cam.bias");
        std::fs::write(&path, "# tuned by hand\n\n% legacy comment\n123 bias_fo\n").unwrap();

        let mut camera = opened();
        camera.load_biases(&path).unwrap();
        assert_eq!(camera.bias("bias_fo").unwrap(), 123);
    }

    #[test]
    fn bad_bias_file_leaves_the_table_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cam.bias");
        // Second line is malformed, so not even the first may apply.
        std::fs::write(&path, "123 bias_fo\nnot-a-number bias_hpf\n").unwrap();

        let mut camera = opened();
        let before = camera.biases();
        assert!(camera.load_biases(&path).is_err());
        assert_eq!(camera.biases(), before);

        std::fs::write(&path, "5 bias_nope\n").unwrap();
        assert!(camera.load_biases(&path).is_err());
        assert_eq!(camera.biases(), before);
    }
}

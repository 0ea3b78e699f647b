//! Camera capability provider
//!
//! The `EventCamera` trait is the seam between the relay pipeline and the
//! vendor SDK. A session drives it through open → configure → register
//! callbacks → start → stop, and every fallible call returns a
//! [`DeviceError`] instead of letting an SDK exception escape. The `sim`
//! feature provides a hardware-free implementation.

use std::path::Path;

use crate::error::DeviceError;
use crate::event::EventRecord;

/// How to pick the camera at open time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraSelector {
    /// First device the driver enumerates.
    FirstAvailable,
    /// Device with this serial number.
    Serial(String),
}

/// Multi-camera synchronization role, in the device's own vocabulary.
/// Sessions map their configured sync mode onto this (primary → master,
/// secondary → slave).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRole {
    Standalone,
    Master,
    Slave,
}

/// Connection status reported through the status callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraStatus {
    Started,
    Stopped,
}

/// Opaque handle for a registered callback, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

impl CallbackId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Invoked from the device's delivery thread with a contiguous run of
/// records. Must never panic into the device; sessions wrap their callbacks
/// in a panic shield.
pub type EventCallback = Box<dyn FnMut(&[EventRecord]) + Send>;

/// Invoked on camera status transitions.
pub type StatusCallback = Box<dyn FnMut(CameraStatus) + Send>;

/// Invoked when the device reports a runtime error.
pub type ErrorCallback = Box<dyn FnMut(DeviceError) + Send>;

/// An event camera as the session sees it.
///
/// Implementations are free to deliver events from any thread they own;
/// callbacks registered here must be assumed to run concurrently with the
/// thread driving the session. Bias writes are authoritative on the device
/// side: the value that takes hold may be rounded or clamped, which is why
/// sessions read back after writing.
pub trait EventCamera: Send {
    /// Open the connection. Further calls are only valid after this
    /// succeeds.
    fn open(&mut self, selector: &CameraSelector) -> Result<(), DeviceError>;

    /// Release the connection, stopping any event production first. The
    /// camera may be opened again afterwards. Safe to call on a camera that
    /// was never opened.
    fn close(&mut self);

    /// Effective serial number (available after `open`, which may resolve
    /// a `FirstAvailable` selector to a concrete device).
    fn serial(&self) -> &str;

    /// Sensor width and height in pixels.
    fn geometry(&self) -> (u16, u16);

    fn set_sync_role(&mut self, role: SyncRole) -> Result<(), DeviceError>;

    fn add_status_callback(&mut self, cb: StatusCallback) -> Result<CallbackId, DeviceError>;
    fn remove_status_callback(&mut self, id: CallbackId);

    fn add_error_callback(&mut self, cb: ErrorCallback) -> Result<CallbackId, DeviceError>;
    fn remove_error_callback(&mut self, id: CallbackId);

    fn add_event_callback(&mut self, cb: EventCallback) -> Result<CallbackId, DeviceError>;
    fn remove_event_callback(&mut self, id: CallbackId);

    /// Begin producing events.
    fn start(&mut self) -> Result<(), DeviceError>;

    /// Stop producing events. No callback fires after this returns.
    fn stop(&mut self) -> Result<(), DeviceError>;

    fn is_running(&self) -> bool;

    /// Current value of a bias parameter.
    fn bias(&self, name: &str) -> Result<i32, DeviceError>;

    /// Write a bias parameter. The device may clamp or round; read back to
    /// learn what actually took hold.
    fn set_bias(&mut self, name: &str, value: i32) -> Result<(), DeviceError>;

    /// All bias parameters with their current values.
    fn biases(&self) -> Vec<(String, i32)>;

    /// Load bias values from a file in the device's native format.
    fn load_biases(&mut self, path: &Path) -> Result<(), DeviceError>;

    /// Persist current bias values to a file in the device's native format.
    fn save_biases(&self, path: &Path) -> Result<(), DeviceError>;
}

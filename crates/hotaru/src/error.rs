//! Error taxonomy for the relay pipeline
//!
//! Device failures are caught at every call site and converted into one of
//! these types; nothing here is ever allowed to propagate back across a
//! device callback boundary.

use thiserror::Error;

/// The device-exception equivalent: any camera-side call can fail with one
/// of these. Carries only a message, since the underlying SDK error is not
/// inspectable beyond its text.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DeviceError {
    message: String,
}

impl DeviceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Fatal failures during `DeviceSession::initialize`. The session stays
/// `Uninitialized` and leaves no partial state behind.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("session already initialized")]
    AlreadyInitialized,
    #[error("invalid sync mode `{0}` (expected standalone, primary, or secondary)")]
    InvalidSyncMode(String),
    #[error("could not open camera: {0}")]
    Open(DeviceError),
    #[error("camera setup failed: {0}")]
    Setup(DeviceError),
}

/// Fatal failures during `DeviceSession::start`. A worker thread spawned
/// before the failure is shut down and joined before the error is returned.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("session is not initialized")]
    NotInitialized,
    #[error("could not spawn relay worker: {0}")]
    Worker(std::io::Error),
    #[error("camera start failed: {0}")]
    Device(DeviceError),
}

/// Bias parameter access failures. Never changes session state.
#[derive(Debug, Error)]
pub enum BiasError {
    #[error("unknown bias parameter `{0}`")]
    NotFound(String),
    #[error("device rejected bias write: {0}")]
    Device(DeviceError),
}

//! Sensor event records
//!
//! A contrast-detection event as delivered by the camera: a pixel fired at
//! device time `t` with an on/off polarity. The relay treats records as
//! opaque payload; only `t` and `p` are ever inspected, and only by the
//! statistics aggregator.

/// One contrast-detection event.
///
/// `t` is the device clock in microseconds and is non-decreasing within a
/// delivered batch. `p` is the polarity category, 0 (off) or 1 (on).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    /// Device timestamp in microseconds.
    pub t: i64,
    /// Pixel column.
    pub x: u16,
    /// Pixel row.
    pub y: u16,
    /// Polarity category: 0 = off, 1 = on.
    pub p: u8,
}

impl EventRecord {
    /// Create a record with the given timestamp and polarity at pixel (x, y).
    pub fn new(t: i64, x: u16, y: u16, p: u8) -> Self {
        Self { t, x, y, p }
    }
}

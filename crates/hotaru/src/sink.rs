//! Downstream consumer seam
//!
//! Whatever ultimately receives the event stream (a message publisher, a
//! recorder, a test collector) implements `EventSink`. The relay polls
//! `keep_running` as its external shutdown signal, so a sink can end the
//! pipeline by returning false.

use crate::event::EventRecord;

/// Receives contiguous runs of event records from the relay.
///
/// `publish` is infallible from the relay's point of view: a sink that hits
/// an internal error is expected to deal with it itself and, if fatal, start
/// returning `false` from `keep_running`.
pub trait EventSink: Send {
    /// Consume one batch of records. Called from the hot path (device
    /// callback in inline mode, relay worker otherwise), so this should not
    /// block longer than it must.
    fn publish(&mut self, records: &[EventRecord]);

    /// Polled by the relay loop; return false to shut the pipeline down.
    fn keep_running(&self) -> bool {
        true
    }
}

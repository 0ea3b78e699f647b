//! Throughput and backlog statistics
//!
//! Rolling counters owned exclusively by whichever thread runs the hot path
//! (the device callback inline, the relay worker otherwise), so nothing
//! here is synchronized. Rates are in events per microsecond of device
//! time, which reads as Mev/s. A summary is produced once the event
//! timestamps cross the flush boundary; the flush timestamp then advances
//! by exactly one interval rather than snapping to the latest event, which
//! keeps the cadence steady even when processing falls behind.

use std::fmt;

use crate::event::EventRecord;

/// One flushed statistics window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlushSummary {
    /// Average event rate over the window, Mev/s.
    pub avg_rate: f64,
    /// Highest single-batch rate seen in the window, Mev/s.
    pub max_rate: f64,
    /// Average records per batch sent downstream.
    pub avg_batch_size: f64,
    /// Percentage of events in the ON polarity category.
    pub pct_on: u8,
    /// Highest queue depth observed before a pop in the window.
    pub max_queue_depth: usize,
}

impl fmt::Display for FlushSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rate[Mev/s] avg: {:7.3}, max: {:7.3}, out sz: {:7.2} ev, %on: {:3}, qs: {:4}",
            self.avg_rate, self.max_rate, self.avg_batch_size, self.pct_on, self.max_queue_depth
        )
    }
}

/// Accumulates per-batch statistics and flushes a summary on a device-time
/// cadence.
///
/// Polarity counts are coarse: a whole batch is attributed to its first
/// record's category, so the ON percentage is an estimate that costs no
/// per-record scan.
pub struct StatisticsAggregator {
    interval: i64,
    last_flush_t: i64,
    max_rate: f64,
    total_events: u64,
    total_time: i64,
    total_events_sent: u64,
    total_msgs_sent: u64,
    polarity_counts: [u64; 2],
    max_queue_depth: usize,
}

impl StatisticsAggregator {
    /// Create an aggregator flushing every `interval_secs` of device time.
    pub fn new(interval_secs: f64) -> Self {
        Self {
            interval: ((interval_secs * 1e6) as i64).max(1),
            last_flush_t: 0,
            max_rate: 0.0,
            total_events: 0,
            total_time: 0,
            total_events_sent: 0,
            total_msgs_sent: 0,
            polarity_counts: [0, 0],
            max_queue_depth: 0,
        }
    }

    /// Fold a pre-pop queue depth into the window's high-water mark.
    pub fn observe_queue_depth(&mut self, depth: usize) {
        self.max_queue_depth = self.max_queue_depth.max(depth);
    }

    /// Fold one batch into the accumulators. Returns a summary when the
    /// batch's last timestamp crosses the flush boundary; the caller is
    /// expected to log it.
    pub fn update(&mut self, records: &[EventRecord]) -> Option<FlushSummary> {
        let (first, last) = match (records.first(), records.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return None,
        };
        let count = records.len() as u64;
        let span = last.t - first.t;
        let rate = if span != 0 {
            count as f64 / span as f64
        } else {
            0.0
        };
        self.max_rate = self.max_rate.max(rate);
        self.total_events += count;
        self.total_time += span;
        self.total_events_sent += count;
        self.total_msgs_sent += 1;
        self.polarity_counts[(first.p & 1) as usize] += count;

        if last.t <= self.last_flush_t + self.interval {
            return None;
        }

        let total_count = self.polarity_counts[0] + self.polarity_counts[1];
        let summary = FlushSummary {
            avg_rate: if self.total_time > 0 {
                self.total_events as f64 / self.total_time as f64
            } else {
                0.0
            },
            max_rate: self.max_rate,
            avg_batch_size: if self.total_msgs_sent != 0 {
                self.total_events_sent as f64 / self.total_msgs_sent as f64
            } else {
                0.0
            },
            pct_on: (100 * self.polarity_counts[1] / total_count.max(1)) as u8,
            max_queue_depth: self.max_queue_depth,
        };

        self.max_rate = 0.0;
        self.last_flush_t += self.interval;
        self.total_events = 0;
        self.total_time = 0;
        self.total_events_sent = 0;
        self.total_msgs_sent = 0;
        self.polarity_counts = [0, 0];
        self.max_queue_depth = 0;
        Some(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `count` records with timestamps evenly spaced from `t0` to
    /// `t0 + span`, all with polarity `p`.
    fn spanned_records(t0: i64, span: i64, count: usize, p: u8) -> Vec<EventRecord> {
        assert!(count >= 2);
        (0..count)
            .map(|i| {
                let t = t0 + span * i as i64 / (count as i64 - 1);
                EventRecord::new(t, i as u16, 0, p)
            })
            .collect()
    }

    // ========== rate math ==========

    #[test]
    fn hundred_records_over_hundred_micros_is_rate_one() {
        let mut stats = StatisticsAggregator::new(1.0);
        stats.update(&spanned_records(0, 100, 100, 1));
        assert!((stats.max_rate - 1.0).abs() < 1e-9, "rate {}", stats.max_rate);
    }

    #[test]
    fn zero_span_batch_contributes_rate_zero() {
        let mut stats = StatisticsAggregator::new(1.0);
        let records = vec![EventRecord::new(500, 0, 0, 1); 64];
        stats.update(&records);
        assert_eq!(stats.max_rate, 0.0);
        assert_eq!(stats.total_events, 64);
        assert_eq!(stats.total_time, 0);
    }

    #[test]
    fn empty_slice_is_ignored() {
        let mut stats = StatisticsAggregator::new(1.0);
        assert!(stats.update(&[]).is_none());
        assert_eq!(stats.total_msgs_sent, 0);
    }

    #[test]
    fn max_rate_keeps_the_fastest_batch() {
        let mut stats = StatisticsAggregator::new(1.0);
        stats.update(&spanned_records(0, 100, 50, 1)); // 0.5 ev/us
        stats.update(&spanned_records(200, 100, 200, 1)); // 2.0 ev/us
        stats.update(&spanned_records(400, 100, 10, 1)); // 0.1 ev/us
        assert!((stats.max_rate - 2.0).abs() < 1e-9);
    }

    // ========== flush cadence ==========

    #[test]
    fn n_intervals_produce_exactly_n_flushes() {
        // 1 ms flush interval, batches every 100 us.
        let mut stats = StatisticsAggregator::new(0.001);
        let n = 5;
        let mut flushes = Vec::new();
        for step in 1..=(n * 10) {
            let t0 = step as i64 * 100;
            if let Some(summary) = stats.update(&spanned_records(t0, 50, 10, 1)) {
                flushes.push(summary);
            }
        }
        assert_eq!(flushes.len(), n);
        assert_eq!(stats.last_flush_t, n as i64 * 1000);
    }

    #[test]
    fn flush_timestamp_advances_by_one_interval_not_to_now() {
        let mut stats = StatisticsAggregator::new(0.001);
        // One batch far past the first boundary.
        let summary = stats.update(&spanned_records(1700, 50, 10, 1));
        assert!(summary.is_some());
        assert_eq!(stats.last_flush_t, 1000);
        // The cadence is preserved: the very next batch crosses the second
        // boundary and flushes again.
        assert!(stats.update(&spanned_records(2100, 50, 10, 1)).is_some());
        assert_eq!(stats.last_flush_t, 2000);
    }

    #[test]
    fn flush_resets_accumulators() {
        let mut stats = StatisticsAggregator::new(0.001);
        stats.observe_queue_depth(7);
        // 1.0 ev/us window, flushed by crossing t = 1000.
        let first = stats.update(&spanned_records(950, 100, 100, 1));
        let first = first.expect("crossed the first boundary");
        assert!((first.max_rate - 1.0).abs() < 1e-9);
        assert_eq!(first.max_queue_depth, 7);
        assert_eq!(first.pct_on, 100);

        // Second window only sees a 0.5 ev/us batch and no queue depth.
        let second = stats.update(&spanned_records(2050, 100, 50, 0));
        let second = second.expect("crossed the second boundary");
        assert!((second.avg_rate - 0.5).abs() < 1e-9, "avg {}", second.avg_rate);
        assert!((second.max_rate - 0.5).abs() < 1e-9);
        assert_eq!(second.max_queue_depth, 0);
        assert_eq!(second.pct_on, 0);
        assert!((second.avg_batch_size - 50.0).abs() < 1e-9);
    }

    // ========== summary contents ==========

    #[test]
    fn average_batch_size_spans_the_window() {
        let mut stats = StatisticsAggregator::new(0.001);
        stats.update(&spanned_records(100, 50, 10, 1));
        let summary = stats.update(&spanned_records(1000, 100, 20, 1));
        let summary = summary.expect("crossed the boundary");
        assert!((summary.avg_batch_size - 15.0).abs() < 1e-9);
    }

    #[test]
    fn polarity_attribution_is_per_batch() {
        let mut stats = StatisticsAggregator::new(0.001);
        stats.update(&spanned_records(100, 50, 30, 1));
        stats.update(&spanned_records(200, 50, 10, 0));
        let summary = stats.update(&spanned_records(1500, 50, 10, 1));
        let summary = summary.expect("crossed the boundary");
        // 40 of 50 events attributed to ON.
        assert_eq!(summary.pct_on, 80);
    }

    #[test]
    fn summary_formats_like_a_rate_line() {
        let summary = FlushSummary {
            avg_rate: 1.234,
            max_rate: 5.678,
            avg_batch_size: 512.5,
            pct_on: 42,
            max_queue_depth: 9,
        };
        let line = summary.to_string();
        assert!(line.contains("rate[Mev/s]"), "{line}");
        assert!(line.contains("1.234"), "{line}");
        assert!(line.contains("%on:  42"), "{line}");
    }
}

//! Relay worker thread
//!
//! The dedicated consumer for worker-mode sessions: drains the transfer
//! queue, feeds the statistics aggregator, publishes to the sink, and
//! recycles each buffer. The queue wait is bounded to one second so the
//! loop re-checks its stop conditions even if no notification ever
//! arrives, which is what keeps the thread joinable.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::pool::BufferPool;
use crate::queue::TransferQueue;
use crate::sink::EventSink;
use crate::stats::StatisticsAggregator;

const POP_TIMEOUT: Duration = Duration::from_secs(1);

/// Consumer loop state. Built by the session at `start` and consumed by the
/// spawned thread; the aggregator lives here and is never shared.
pub struct RelayWorker<S: EventSink> {
    queue: Arc<TransferQueue>,
    pool: BufferPool,
    stats: StatisticsAggregator,
    sink: S,
    reported_dropped: u64,
    reported_starved: u64,
}

impl<S: EventSink> RelayWorker<S> {
    pub fn new(
        queue: Arc<TransferQueue>,
        pool: BufferPool,
        stats: StatisticsAggregator,
        sink: S,
    ) -> Self {
        Self {
            queue,
            pool,
            stats,
            sink,
            reported_dropped: 0,
            reported_starved: 0,
        }
    }

    /// Run until the sink stops or the queue is shut down, then drain
    /// whatever is still queued so every buffer goes back to the pool.
    pub fn run(mut self) {
        while self.sink.keep_running() && !self.queue.is_shut_down() {
            let Some((batch, depth)) = self.queue.pop_blocking(POP_TIMEOUT) else {
                continue;
            };
            self.stats.observe_queue_depth(depth);
            if let Some(summary) = self.stats.update(batch.records()) {
                info!("{summary}");
                self.report_losses();
            }
            self.sink.publish(batch.records());
        }
        let drained = self.queue.drain();
        if drained > 0 {
            debug!(drained, "recycled undelivered batches");
        }
        info!("relay worker exited");
    }

    /// Surface producer-side losses at flush cadence: batches displaced by
    /// queue overflow and callback deliveries dropped on an empty pool.
    fn report_losses(&mut self) {
        let dropped = self.queue.stats().dropped;
        let starved = self.pool.starved();
        let new_dropped = dropped - self.reported_dropped;
        let new_starved = starved - self.reported_starved;
        if new_dropped > 0 || new_starved > 0 {
            warn!(
                displaced = new_dropped,
                starved = new_starved,
                "backlog shed data this window"
            );
        }
        self.reported_dropped = dropped;
        self.reported_starved = starved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventRecord;
    use parking_lot::Mutex;
    use std::thread;
    use std::time::Instant;

    /// Records the first timestamp of every published batch and stops the
    /// pipeline after `stop_after` batches.
    struct CollectSink {
        seen: Arc<Mutex<Vec<i64>>>,
        stop_after: usize,
    }

    impl EventSink for CollectSink {
        fn publish(&mut self, records: &[EventRecord]) {
            self.seen.lock().push(records[0].t);
        }

        fn keep_running(&self) -> bool {
            self.seen.lock().len() < self.stop_after
        }
    }

    fn push_marked(pool: &BufferPool, queue: &TransferQueue, marker: i64) {
        let mut batch = pool.acquire().unwrap();
        let records = [
            EventRecord::new(marker, 0, 0, 1),
            EventRecord::new(marker + 1, 1, 0, 0),
        ];
        batch.extend_from_slice(&records);
        queue.push(batch);
    }

    #[test]
    fn publishes_in_fifo_order_then_stops_on_sink_signal() {
        let pool = BufferPool::new(4, 8);
        let queue = Arc::new(TransferQueue::new(4));
        for m in [10, 20, 30] {
            push_marked(&pool, &queue, m);
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = CollectSink {
            seen: Arc::clone(&seen),
            stop_after: 3,
        };
        let worker = RelayWorker::new(
            Arc::clone(&queue),
            pool.clone(),
            StatisticsAggregator::new(1.0),
            sink,
        );
        let handle = thread::spawn(move || worker.run());
        handle.join().unwrap();

        assert_eq!(*seen.lock(), vec![10, 20, 30]);
        assert_eq!(pool.available(), pool.buffer_count());
        assert_eq!(queue.stats().popped, 3);
    }

    #[test]
    fn exits_without_publishing_when_already_shut_down() {
        let pool = BufferPool::new(4, 8);
        let queue = Arc::new(TransferQueue::new(4));
        push_marked(&pool, &queue, 1);
        push_marked(&pool, &queue, 2);
        queue.shutdown();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = CollectSink {
            seen: Arc::clone(&seen),
            stop_after: usize::MAX,
        };
        let worker = RelayWorker::new(
            Arc::clone(&queue),
            pool.clone(),
            StatisticsAggregator::new(1.0),
            sink,
        );
        thread::spawn(move || worker.run()).join().unwrap();

        // Undelivered batches were drained back to the pool, not leaked.
        assert!(seen.lock().is_empty());
        assert_eq!(pool.available(), pool.buffer_count());
        assert_eq!(queue.stats().dropped, 2);
    }

    #[test]
    fn shutdown_interrupts_a_waiting_worker() {
        let pool = BufferPool::new(2, 8);
        let queue = Arc::new(TransferQueue::new(2));
        let sink = CollectSink {
            seen: Arc::new(Mutex::new(Vec::new())),
            stop_after: usize::MAX,
        };
        let worker = RelayWorker::new(
            Arc::clone(&queue),
            pool.clone(),
            StatisticsAggregator::new(1.0),
            sink,
        );
        let handle = thread::spawn(move || worker.run());

        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        queue.shutdown();
        handle.join().unwrap();
        // Woken by the notification, well inside the 1 s pop timeout.
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

//! Producer/consumer batch hand-off
//!
//! A bounded FIFO carrying ownership of event batches from the device
//! callback to the relay worker. The producer side never blocks beyond the
//! mutex: when the queue is full the oldest batch is displaced (its buffer
//! recycles on drop) and the new one admitted, so sustained overload sheds
//! the stalest data first while delivery order stays strict FIFO. The
//! consumer waits on a condition variable with a bounded timeout; shutdown
//! sets the flag and notifies under the same lock, so a consumer between
//! its predicate check and its wait cannot miss the wakeup.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::pool::EventBatch;

/// Counters for one queue's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    /// Batches accepted by `push`.
    pub pushed: u64,
    /// Batches handed to the consumer.
    pub popped: u64,
    /// Batches displaced by overflow (plus any arriving after shutdown).
    pub dropped: u64,
}

struct Shared {
    queue: VecDeque<EventBatch>,
    shutdown: bool,
    pushed: u64,
    popped: u64,
    dropped: u64,
}

/// Thread-safe bounded FIFO of [`EventBatch`] ownership tokens.
pub struct TransferQueue {
    shared: Mutex<Shared>,
    available: Condvar,
    capacity: usize,
}

impl TransferQueue {
    /// Create a queue holding at most `capacity` batches.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Mutex::new(Shared {
                queue: VecDeque::with_capacity(capacity),
                shutdown: false,
                pushed: 0,
                popped: 0,
                dropped: 0,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Append a batch and wake one waiter. Never blocks beyond the lock.
    /// At capacity the oldest queued batch is displaced and counted; after
    /// shutdown the batch is dropped outright (its buffer recycles).
    pub fn push(&self, batch: EventBatch) {
        if batch.is_empty() {
            debug_assert!(false, "empty batches are never queued");
            return;
        }
        let displaced;
        {
            let mut shared = self.shared.lock();
            if shared.shutdown {
                shared.dropped += 1;
                displaced = Some(batch);
            } else {
                displaced = if shared.queue.len() == self.capacity {
                    shared.dropped += 1;
                    shared.queue.pop_front()
                } else {
                    None
                };
                shared.queue.push_back(batch);
                shared.pushed += 1;
                self.available.notify_one();
            }
        }
        // Recycle outside the critical section.
        drop(displaced);
    }

    /// Remove and return the oldest batch, waiting up to `timeout` for one
    /// to arrive. Also returns the queue depth observed before removal
    /// (including the returned batch). `None` on timeout, or on shutdown
    /// with an empty queue; batches still queued at shutdown are drained,
    /// not lost.
    pub fn pop_blocking(&self, timeout: Duration) -> Option<(EventBatch, usize)> {
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or(now + Duration::from_secs(3600));
        let mut shared = self.shared.lock();
        while shared.queue.is_empty() && !shared.shutdown {
            if self.available.wait_until(&mut shared, deadline).timed_out() {
                break;
            }
        }
        let depth = shared.queue.len();
        let batch = shared.queue.pop_front()?;
        shared.popped += 1;
        Some((batch, depth))
    }

    /// Mark the queue shut down and wake every waiter. The flag and the
    /// notification go out under the queue lock, which is what makes a
    /// blocked consumer's wakeup reliable. Idempotent.
    pub fn shutdown(&self) {
        let mut shared = self.shared.lock();
        shared.shutdown = true;
        self.available.notify_all();
    }

    /// Clear the shutdown flag so the queue accepts pushes again. Used when
    /// a start attempt is rolled back: the event callback keeps its handle
    /// to this queue, so the same queue must serve the next attempt.
    pub fn reopen(&self) {
        self.shared.lock().shutdown = false;
    }

    /// Drop everything queued right now, recycling the buffers, and return
    /// how many batches that was. Used at teardown; drained batches count
    /// as dropped, since they were never delivered.
    pub fn drain(&self) -> usize {
        let drained: Vec<EventBatch> = {
            let mut shared = self.shared.lock();
            let drained: Vec<EventBatch> = shared.queue.drain(..).collect();
            shared.dropped += drained.len() as u64;
            drained
        };
        drained.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.lock().shutdown
    }

    pub fn len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        let shared = self.shared.lock();
        QueueStats {
            pushed: shared.pushed,
            popped: shared.popped,
            dropped: shared.dropped,
        }
    }
}

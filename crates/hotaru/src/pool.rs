//! Fixed buffer pool for event batches
//!
//! The device callback must copy records somewhere without allocating on
//! every delivery, so the pool pre-allocates a fixed set of record buffers
//! and hands them out behind a lock-free free list. A batch returns its
//! buffer automatically when dropped, wherever that happens: after the sink
//! consumed it, when the queue displaces it under overflow, or during
//! teardown with batches still in flight. When the pool is empty the
//! producer drops data instead of allocating; every failed acquire is
//! counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::event::EventRecord;

struct PoolInner {
    free: ArrayQueue<Vec<EventRecord>>,
    batch_capacity: usize,
    buffers: usize,
    starved: AtomicU64,
}

/// A fixed set of reusable record buffers. Cheap to clone; clones share the
/// same free list.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Pre-allocate `buffers` buffers of `batch_capacity` records each.
    pub fn new(buffers: usize, batch_capacity: usize) -> Self {
        let buffers = buffers.max(1);
        let batch_capacity = batch_capacity.max(1);
        let free = ArrayQueue::new(buffers);
        for _ in 0..buffers {
            // Cannot fail: the queue was sized for exactly this many.
            let _ = free.push(Vec::with_capacity(batch_capacity));
        }
        Self {
            inner: Arc::new(PoolInner {
                free,
                batch_capacity,
                buffers,
                starved: AtomicU64::new(0),
            }),
        }
    }

    /// Take a free buffer, or `None` if every buffer is currently in
    /// flight. A `None` is counted as a starvation.
    pub fn acquire(&self) -> Option<EventBatch> {
        match self.inner.free.pop() {
            Some(records) => Some(EventBatch {
                records,
                pool: Arc::clone(&self.inner),
            }),
            None => {
                self.inner.starved.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Buffers currently sitting in the free list.
    pub fn available(&self) -> usize {
        self.inner.free.len()
    }

    /// Total buffers owned by the pool.
    pub fn buffer_count(&self) -> usize {
        self.inner.buffers
    }

    /// Records each buffer can hold.
    pub fn batch_capacity(&self) -> usize {
        self.inner.batch_capacity
    }

    /// How many acquires have failed because the pool was empty.
    pub fn starved(&self) -> u64 {
        self.inner.starved.load(Ordering::Relaxed)
    }
}

/// A pool buffer holding a contiguous run of records.
///
/// Exclusively owned by whoever holds it; there is no way to alias the
/// records across threads. Dropping the batch recycles the buffer back to
/// its pool.
pub struct EventBatch {
    records: Vec<EventRecord>,
    pool: Arc<PoolInner>,
}

impl EventBatch {
    /// Append as many records from `records` as fit, returning how many
    /// were taken. The caller continues with the untaken tail in the next
    /// batch.
    pub fn extend_from_slice(&mut self, records: &[EventRecord]) -> usize {
        let take = self.remaining().min(records.len());
        self.records.extend_from_slice(&records[..take]);
        take
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Room left before this batch is full.
    pub fn remaining(&self) -> usize {
        self.pool.batch_capacity - self.records.len()
    }
}

impl Drop for EventBatch {
    fn drop(&mut self) {
        let mut records = std::mem::take(&mut self.records);
        records.clear();
        // Cannot overflow: the free list is sized for every buffer the
        // pool ever handed out.
        let _ = self.pool.free.push(records);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_records(n: usize) -> Vec<EventRecord> {
        (0..n)
            .map(|i| EventRecord::new(i as i64, i as u16, 0, (i % 2) as u8))
            .collect()
    }

    #[test]
    fn acquire_takes_from_free_list() {
        let pool = BufferPool::new(4, 128);
        assert_eq!(pool.available(), 4);
        let batch = pool.acquire().unwrap();
        assert_eq!(pool.available(), 3);
        assert!(batch.is_empty());
        assert_eq!(batch.remaining(), 128);
    }

    #[test]
    fn drop_recycles_the_buffer() {
        let pool = BufferPool::new(2, 16);
        let batch = pool.acquire().unwrap();
        assert_eq!(pool.available(), 1);
        drop(batch);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn recycled_buffer_comes_back_empty() {
        let pool = BufferPool::new(1, 16);
        let mut batch = pool.acquire().unwrap();
        batch.extend_from_slice(&make_records(10));
        assert_eq!(batch.len(), 10);
        drop(batch);

        let batch = pool.acquire().unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.remaining(), 16);
    }

    #[test]
    fn exhausted_pool_returns_none_and_counts() {
        let pool = BufferPool::new(2, 16);
        let _a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
        assert!(pool.acquire().is_none());
        assert_eq!(pool.starved(), 2);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn extend_stops_at_capacity() {
        let pool = BufferPool::new(1, 4);
        let mut batch = pool.acquire().unwrap();
        let records = make_records(6);

        let taken = batch.extend_from_slice(&records);
        assert_eq!(taken, 4);
        assert_eq!(batch.len(), 4);
        assert_eq!(batch.remaining(), 0);
        assert_eq!(batch.extend_from_slice(&records[taken..]), 0);
        assert_eq!(batch.records()[0], records[0]);
        assert_eq!(batch.records()[3], records[3]);
    }

    #[test]
    fn clones_share_the_free_list() {
        let pool = BufferPool::new(2, 16);
        let clone = pool.clone();
        let batch = clone.acquire().unwrap();
        assert_eq!(pool.available(), 1);
        drop(batch);
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.buffer_count(), clone.buffer_count());
    }

    #[test]
    fn zero_sizes_are_clamped_to_one() {
        let pool = BufferPool::new(0, 0);
        assert_eq!(pool.buffer_count(), 1);
        assert_eq!(pool.batch_capacity(), 1);
        let mut batch = pool.acquire().unwrap();
        assert_eq!(batch.extend_from_slice(&make_records(3)), 1);
    }
}

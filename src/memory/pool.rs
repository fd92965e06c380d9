//! Buffer Pooling - Reuse streaming chunk buffers across worker threads
//!
//! I/O workers take a buffer, fill it with downloaded bytes and ship it to
//! the heartbeat thread inside a streaming record. Once the streaming
//! callback is done with it the buffer comes back here. Parked buffers sit
//! in a bounded lock-free queue, so neither side ever blocks on the pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::queue::ArrayQueue;

/// Counters for a buffer pool
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Buffers allocated because nothing was parked
    pub created: AtomicUsize,
    /// Parked buffers handed out again
    pub reused: AtomicUsize,
    /// Buffers dropped on release because the pool was full
    pub discarded: AtomicUsize,
}

impl PoolStats {
    /// Percentage of acquisitions served from parked buffers
    pub fn hit_rate(&self) -> f64 {
        let reused = self.reused.load(Ordering::Relaxed);
        let created = self.created.load(Ordering::Relaxed);
        match reused + created {
            0 => 0.0,
            total => reused as f64 * 100.0 / total as f64,
        }
    }
}

/// Pool of byte buffers shared between producers and the consumer
#[derive(Clone)]
pub struct BufferPool {
    parked: Arc<ArrayQueue<Vec<u8>>>,
    stats: Arc<PoolStats>,
    buffer_capacity: usize,
}

impl BufferPool {
    /// Keep at most `max_pooled` (at least one) buffers of `buffer_capacity` bytes
    pub fn new(max_pooled: usize, buffer_capacity: usize) -> Self {
        Self {
            parked: Arc::new(ArrayQueue::new(max_pooled.max(1))),
            stats: Arc::new(PoolStats::default()),
            buffer_capacity,
        }
    }

    /// Take an empty buffer, allocating one if none is parked
    pub fn acquire(&self) -> Vec<u8> {
        match self.parked.pop() {
            Some(buffer) => {
                self.stats.reused.fetch_add(1, Ordering::Relaxed);
                buffer
            }
            None => {
                self.stats.created.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(self.buffer_capacity)
            }
        }
    }

    /// Give a buffer back; its contents are discarded
    pub fn release(&self, mut buffer: Vec<u8>) {
        buffer.clear();
        if self.parked.push(buffer).is_err() {
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Buffers currently parked
    pub fn available(&self) -> usize {
        self.parked.len()
    }

    /// Drop every parked buffer
    pub fn clear(&self) {
        while self.parked.pop().is_some() {}
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(64, 16 * 1024)
    }
}

//! Generic multi-producer, single-consumer event channel

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crossbeam::queue::SegQueue;

/// Handle returned by [`EventChannel::subscribe`]
pub type ObserverId = u64;

type Observer<R> = Box<dyn FnMut(&R) + Send>;

/// Lock-free queue written by worker threads
pub struct EventQueue<R> {
    records: SegQueue<R>,
}

impl<R> EventQueue<R> {
    pub fn new() -> Self {
        Self {
            records: SegQueue::new(),
        }
    }

    /// Never blocks; callable from any thread
    pub fn push(&self, record: R) {
        self.records.push(record);
    }

    pub fn pop(&self) -> Option<R> {
        self.records.pop()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Discard everything queued
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        while self.records.pop().is_some() {
            dropped += 1;
        }
        dropped
    }
}

impl<R> Default for EventQueue<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer side of one channel: the queue plus its observers
pub struct EventChannel<R> {
    name: &'static str,
    queue: Arc<EventQueue<R>>,
    observers: Vec<(ObserverId, Observer<R>)>,
    next_observer: ObserverId,
}

impl<R> EventChannel<R> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            queue: Arc::new(EventQueue::new()),
            observers: Vec::new(),
            next_observer: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Producer handle for worker threads
    pub fn queue(&self) -> Arc<EventQueue<R>> {
        Arc::clone(&self.queue)
    }

    pub fn enqueue(&self, record: R) {
        self.queue.push(record);
    }

    /// Attach an observer that sees every record before built-in handling
    pub fn subscribe(&mut self, observer: impl FnMut(&R) + Send + 'static) -> ObserverId {
        self.next_observer += 1;
        self.observers.push((self.next_observer, Box::new(observer)));
        self.next_observer
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer, _)| *observer != id);
        self.observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Process the records queued when the drain starts, in FIFO order.
    ///
    /// Records the handler enqueues on this channel wait for the next drain.
    /// Observer panics are logged and do not stop the drain.
    pub fn drain_and_process(&mut self, mut handler: impl FnMut(R)) -> usize {
        let pending = self.queue.len();
        let mut processed = 0;
        while processed < pending {
            let Some(record) = self.queue.pop() else {
                break;
            };
            for (id, observer) in self.observers.iter_mut() {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| observer(&record)));
                if outcome.is_err() {
                    log::error!("{} channel: observer {} panicked", self.name, id);
                }
            }
            handler(record);
            processed += 1;
        }
        processed
    }

    /// Drop pending records
    pub fn clear(&self) -> usize {
        self.queue.clear()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

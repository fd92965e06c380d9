//! Deadline queue for checks that run on the heartbeat thread
//!
//! A check returns [`TimerOutcome::Repeat`] to run again one interval later,
//! or [`TimerOutcome::Done`] to drop out of the queue.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use crate::network::{ConnectionId, RequestHandle};
use crate::pool::VariantKey;

/// Work a timer performs when it comes due
#[derive(Debug, Clone)]
pub enum TimerAction {
    /// Close the connection if it is still free and past its keep-alive
    RecycleCheck {
        key: VariantKey,
        connection: ConnectionId,
    },
    /// Time the request out once it exceeds its deadline
    RequestTimeout { request: RequestHandle },
}

/// Result of running a check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    Repeat,
    Done,
}

#[derive(Debug)]
struct Scheduled {
    due: Instant,
    seq: u64,
    action: TimerAction,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earliest deadline on top; ties run in scheduling order
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-heap of scheduled checks
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Scheduled>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` at or after `due`
    pub fn schedule(&mut self, due: Instant, action: TimerAction) {
        self.next_seq += 1;
        self.heap.push(Scheduled {
            due,
            seq: self.next_seq,
            action,
        });
    }

    /// Next action whose deadline has passed
    pub fn pop_due(&mut self, now: Instant) -> Option<TimerAction> {
        if self.heap.peek()?.due > now {
            return None;
        }
        self.heap.pop().map(|scheduled| scheduled.action)
    }

    /// Earliest pending deadline
    pub fn next_due(&self) -> Option<Instant> {
        self.heap.peek().map(|scheduled| scheduled.due)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

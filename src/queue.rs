//! Deferred queue for rate-denied submissions.
//!
//! Submissions denied admission are parked here in FIFO order; the drain
//! worker pops from the head once the rate limiter re-admits. Entries carry
//! the already-computed fingerprint so the drain path never re-derives it.

use std::collections::VecDeque;

use crate::types::{Fingerprint, Message};

/// A rate-denied submission waiting for the drain worker.
#[derive(Debug, Clone)]
pub struct QueuedSubmission {
    /// The original message.
    pub message: Message,
    /// Its fingerprint, computed at submit time.
    pub fingerprint: Fingerprint,
}

/// FIFO of deferred submissions.
#[derive(Debug, Default)]
pub struct DeferredQueue {
    entries: parking_lot::Mutex<VecDeque<QueuedSubmission>>,
}

impl DeferredQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a submission to the tail.
    pub fn push(&self, message: Message, fingerprint: Fingerprint) {
        self.entries.lock().push_back(QueuedSubmission {
            message,
            fingerprint,
        });
    }

    /// Pop the head submission, if any.
    pub fn pop(&self) -> Option<QueuedSubmission> {
        self.entries.lock().pop_front()
    }

    /// Number of parked submissions.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_fifo_order() {
        let queue = DeferredQueue::new();
        let first = Message::new("a@x", "b@y", "first", "1");
        let second = Message::new("a@x", "b@y", "second", "2");

        queue.push(first.clone(), first.fingerprint());
        queue.push(second.clone(), second.fingerprint());
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop().unwrap().message.subject, "first");
        assert_eq!(queue.pop().unwrap().message.subject, "second");
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }
}

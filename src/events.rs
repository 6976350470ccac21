//! Event dispatch for resolved and deferred submissions.
//!
//! A subscription registry keyed by event kind holds an ordered subscriber
//! list. Subscribers are invoked synchronously with respect to the emitting
//! operation and must not block indefinitely; long-running reactions belong
//! on a task the subscriber spawns itself.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use ahash::AHashMap;

use crate::types::{DeliveryReceipt, Fingerprint, Message};

/// The kinds of events the engine emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A submission resolved successfully.
    Sent,
    /// A submission exhausted every transport.
    Failed,
    /// A submission was rate-denied and parked in the deferred queue.
    Queued,
}

/// Payload of an emitted event.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Sent {
        fingerprint: Fingerprint,
        message: Message,
        receipt: DeliveryReceipt,
    },
    Failed {
        fingerprint: Fingerprint,
        message: Message,
        last_error: String,
    },
    Queued {
        fingerprint: Fingerprint,
        message: Message,
    },
}

impl EngineEvent {
    /// The kind this payload belongs to.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Sent { .. } => EventKind::Sent,
            Self::Failed { .. } => EventKind::Failed,
            Self::Queued { .. } => EventKind::Queued,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`], usable for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberId(u64);

type Subscriber = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// Multi-subscriber publish mechanism.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: parking_lot::RwLock<AHashMap<EventKind, Vec<(SubscriberId, Subscriber)>>>,
}

impl EventBus {
    /// Create an event bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for one event kind. Subscribers fire in
    /// registration order.
    pub fn subscribe(
        &self,
        kind: EventKind,
        subscriber: impl Fn(&EngineEvent) + Send + Sync + 'static,
    ) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(subscriber)));
        id
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut subscribers = self.subscribers.write();
        for list in subscribers.values_mut() {
            list.retain(|(subscriber_id, _)| *subscriber_id != id);
        }
    }

    /// Publish an event to every subscriber of its kind, in order.
    ///
    /// The subscriber list is cloned out of the lock first, so a subscriber
    /// may itself subscribe or unsubscribe without deadlocking.
    pub fn emit(&self, event: &EngineEvent) {
        let snapshot: Vec<Subscriber> = {
            let subscribers = self.subscribers.read();
            subscribers
                .get(&event.kind())
                .map(|list| list.iter().map(|(_, s)| s.clone()).collect())
                .unwrap_or_default()
        };
        for subscriber in snapshot {
            subscriber(event);
        }
    }

    /// Number of registered subscribers across all kinds.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().values().map(Vec::len).sum()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

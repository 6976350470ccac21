//! Result registry: idempotency cache and status table.
//!
//! Two fingerprint-keyed stores back the engine's observable state. The
//! receipt cache is append-only for the engine lifetime; the status table is
//! overwritten in place, with terminal states protected from further
//! mutation here rather than at every call site. DashMap entry locks give
//! per-fingerprint serialized mutation and torn-read-free snapshots.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};

use crate::types::{
    AttemptRecord, DeliveryReceipt, DeliveryState, DeliveryStatus, Fingerprint, unix_now,
};

/// Fingerprint-keyed delivery state.
#[derive(Debug, Default)]
pub struct DeliveryRegistry {
    receipts: DashMap<Fingerprint, DeliveryReceipt>,
    statuses: DashMap<Fingerprint, DeliveryStatus>,
}

impl DeliveryRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached receipt for a fingerprint, if it was ever delivered.
    pub fn cached_receipt(&self, fingerprint: &Fingerprint) -> Option<DeliveryReceipt> {
        self.receipts
            .get(fingerprint)
            .map(|receipt| receipt.clone())
    }

    /// Current status for a fingerprint.
    pub fn status(&self, fingerprint: &Fingerprint) -> Option<DeliveryStatus> {
        self.statuses.get(fingerprint).map(|status| status.clone())
    }

    /// Apply a mutation to a fingerprint's status, creating the entry in the
    /// given initial state when absent. Existing terminal entries are left
    /// untouched.
    fn update(
        &self,
        fingerprint: &Fingerprint,
        initial: DeliveryState,
        apply: impl FnOnce(&mut DeliveryStatus),
    ) {
        match self.statuses.entry(fingerprint.clone()) {
            Entry::Occupied(mut occupied) => {
                let status = occupied.get_mut();
                if status.state.is_terminal() {
                    tracing::warn!(
                        fingerprint = %fingerprint,
                        state = %status.state,
                        "refusing status transition out of a terminal state"
                    );
                    return;
                }
                apply(status);
                status.updated_at = unix_now();
            }
            Entry::Vacant(vacant) => {
                let mut status = DeliveryStatus::new(initial);
                apply(&mut status);
                vacant.insert(status);
            }
        }
    }

    /// Park a submission as queued (attempts at zero).
    ///
    /// Only takes effect while the fingerprint is idle: a dispatch already
    /// mid-flight keeps ownership of the status (a parked duplicate of an
    /// active fingerprint reads as pending/retrying, which is what is
    /// actually happening to it), and sent entries stay frozen.
    pub fn mark_queued(&self, fingerprint: &Fingerprint) {
        match self.statuses.entry(fingerprint.clone()) {
            Entry::Occupied(mut occupied) => {
                let status = occupied.get_mut();
                match status.state {
                    DeliveryState::Queued | DeliveryState::Failed => {
                        status.state = DeliveryState::Queued;
                        status.attempts = 0;
                        status.updated_at = unix_now();
                    }
                    DeliveryState::Pending | DeliveryState::Retrying | DeliveryState::Sent => {}
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(DeliveryStatus::new(DeliveryState::Queued));
            }
        }
    }

    /// Start a dispatch cycle: pending with zero attempts.
    ///
    /// Sent entries are frozen forever (the idempotency cache short-circuits
    /// any resubmission before it reaches here); a failed entry may be
    /// resubmitted, which begins a fresh cycle from scratch.
    pub fn mark_pending(&self, fingerprint: &Fingerprint) {
        match self.statuses.entry(fingerprint.clone()) {
            Entry::Occupied(mut occupied) => {
                let status = occupied.get_mut();
                if status.state == DeliveryState::Sent {
                    tracing::warn!(
                        fingerprint = %fingerprint,
                        "refusing to restart a delivered submission"
                    );
                    return;
                }
                status.state = DeliveryState::Pending;
                status.attempts = 0;
                status.updated_at = unix_now();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(DeliveryStatus::new(DeliveryState::Pending));
            }
        }
    }

    /// Record the start of an attempt on a transport. `attempt_number` is
    /// 1-based within that transport; only the first attempt of the whole
    /// cycle stays pending, everything after is a retry (including the first
    /// attempt on a fallback transport).
    pub fn begin_attempt(
        &self,
        fingerprint: &Fingerprint,
        transport: &Arc<str>,
        attempt_number: u32,
        first_attempt: bool,
    ) {
        self.update(fingerprint, DeliveryState::Pending, |status| {
            status.state = if first_attempt {
                DeliveryState::Pending
            } else {
                DeliveryState::Retrying
            };
            status.attempts = attempt_number;
            status.transport = Some(transport.clone());
        });
    }

    /// Append an attempt record to the fingerprint's history.
    pub fn record_attempt(&self, fingerprint: &Fingerprint, record: AttemptRecord) {
        self.update(fingerprint, DeliveryState::Pending, |status| {
            if let crate::types::AttemptOutcome::TransientFailure(error) = &record.outcome {
                status.last_error = Some(error.clone());
            }
            status.attempt_log.push(record);
        });
    }

    /// Resolve a submission as sent, caching its receipt.
    ///
    /// The receipt cache is append-only: a fingerprint's first receipt wins.
    pub fn mark_sent(&self, fingerprint: &Fingerprint, receipt: &DeliveryReceipt) {
        self.receipts
            .entry(fingerprint.clone())
            .or_insert_with(|| receipt.clone());
        self.update(fingerprint, DeliveryState::Sent, |status| {
            status.state = DeliveryState::Sent;
            status.transport = Some(receipt.transport.clone());
            status.last_error = None;
        });
    }

    /// Resolve a submission as failed after exhausting every transport.
    pub fn mark_failed(&self, fingerprint: &Fingerprint, attempts: u32, error: &str) {
        self.update(fingerprint, DeliveryState::Failed, |status| {
            status.state = DeliveryState::Failed;
            status.attempts = attempts;
            status.last_error = Some(error.to_string());
        });
    }

    /// Count of fingerprints ever observed.
    pub fn total_observed(&self) -> usize {
        self.statuses.len()
    }

    /// Count of entries currently in the given state.
    pub fn count_in_state(&self, state: DeliveryState) -> usize {
        self.statuses
            .iter()
            .filter(|entry| entry.state == state)
            .count()
    }
}

//! Core data model for the send-coordination engine.

use std::{
    fmt::{self, Display},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    circuit_breaker::BreakerState,
    error::{EngineError, Result},
};

/// An outbound message accepted by the engine.
///
/// Messages are immutable once submitted: the engine only ever reads them.
/// An optional caller-supplied idempotency key overrides the derived
/// fingerprint, letting callers force deduplication across differing bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Destination address.
    pub to: String,
    /// Origin address.
    pub from: String,
    /// Subject line.
    pub subject: String,
    /// Message body.
    pub body: String,
    /// Optional caller-supplied idempotency key, used verbatim as the
    /// fingerprint when present.
    pub idempotency_key: Option<String>,
}

impl Message {
    /// Create a new message.
    #[must_use]
    pub fn new(
        to: impl Into<String>,
        from: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            from: from.into(),
            subject: subject.into(),
            body: body.into(),
            idempotency_key: None,
        }
    }

    /// Attach a caller-supplied idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Compute the stable fingerprint for this message.
    ///
    /// The caller-supplied idempotency key wins verbatim; otherwise the
    /// fingerprint is the hex SHA-256 digest of the length-prefixed
    /// (to, from, subject, body) tuple, stable across restarts.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        if let Some(key) = &self.idempotency_key {
            return Fingerprint::new(key.as_str());
        }

        let mut hasher = Sha256::new();
        for field in [&self.to, &self.from, &self.subject, &self.body] {
            let len = u64::try_from(field.len()).unwrap_or(u64::MAX);
            hasher.update(len.to_be_bytes());
            hasher.update(field.as_bytes());
        }
        Fingerprint::new(hex::encode(hasher.finalize()))
    }

    /// Reject messages the engine cannot meaningfully route.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.to.trim().is_empty() {
            return Err(EngineError::InvalidMessage(
                "empty destination address".to_string(),
            ));
        }
        if self.from.trim().is_empty() {
            return Err(EngineError::InvalidMessage(
                "empty origin address".to_string(),
            ));
        }
        Ok(())
    }
}

/// Stable per-message identifier used for idempotency and status lookup.
///
/// Opaque to callers; cheap to clone and hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Fingerprint(Arc<str>);

impl Fingerprint {
    /// Create a fingerprint from any string-like value.
    #[must_use]
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Self(s.into())
    }

    /// Get the fingerprint as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current state of a submission, keyed by fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryState {
    /// First attempt on the current transport is underway.
    Pending,
    /// A repeat attempt on the current transport is underway.
    Retrying,
    /// Parked in the deferred queue awaiting the drain worker.
    Queued,
    /// Delivered; a receipt is cached.
    Sent,
    /// All transports exhausted.
    Failed,
}

impl DeliveryState {
    /// Whether this state ends the submission cycle.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

impl Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    /// The transport accepted the message.
    Delivered,
    /// The transport signalled a transient failure.
    TransientFailure(String),
    /// The transport's circuit breaker refused the call.
    BreakerOpen,
}

/// One entry in a submission's attempt log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Transport the attempt was routed to.
    pub transport: Arc<str>,
    /// 1-based attempt ordinal within that transport.
    pub ordinal: u32,
    /// What happened.
    pub outcome: AttemptOutcome,
    /// Unix timestamp of the attempt.
    pub timestamp: u64,
}

/// Status metadata tracked for every fingerprint the engine has observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatus {
    /// Current state.
    pub state: DeliveryState,
    /// Attempts observed so far on the current transport.
    pub attempts: u32,
    /// Transport currently (or last) handling the submission.
    pub transport: Option<Arc<str>>,
    /// Last transient error description, if any.
    pub last_error: Option<String>,
    /// Unix timestamp of the last update.
    pub updated_at: u64,
    /// Full per-attempt history for this fingerprint.
    pub attempt_log: Vec<AttemptRecord>,
}

impl DeliveryStatus {
    pub(crate) fn new(state: DeliveryState) -> Self {
        Self {
            state,
            attempts: 0,
            transport: None,
            last_error: None,
            updated_at: unix_now(),
            attempt_log: Vec::new(),
        }
    }
}

/// The cached result of a successful delivery. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Fingerprint of the delivered message.
    pub fingerprint: Fingerprint,
    /// Transport-assigned delivery identifier.
    pub delivery_id: String,
    /// Name of the transport that accepted the message.
    pub transport: Arc<str>,
    /// RFC 3339 completion timestamp reported by the transport.
    pub completed_at: String,
    /// Total transport invocations the submission consumed.
    pub attempts: u32,
}

/// What a call to [`crate::Coordinator::submit`] resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Delivered (or replayed from the idempotency cache).
    Sent(DeliveryReceipt),
    /// Rate-denied and parked for the drain worker.
    Queued(Fingerprint),
    /// Every transport was exhausted without success.
    Failed {
        fingerprint: Fingerprint,
        last_error: String,
    },
}

impl SubmitOutcome {
    /// Fingerprint of the submission this outcome belongs to.
    #[must_use]
    pub fn fingerprint(&self) -> &Fingerprint {
        match self {
            Self::Sent(receipt) => &receipt.fingerprint,
            Self::Queued(fingerprint) | Self::Failed { fingerprint, .. } => fingerprint,
        }
    }
}

/// Point-in-time engine statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSnapshot {
    /// Fingerprints ever observed.
    pub total_observed: usize,
    /// Submissions currently resolved as sent.
    pub sent: usize,
    /// Submissions currently resolved as failed.
    pub failed: usize,
    /// Submissions currently parked in the deferred queue state.
    pub queued: usize,
    /// Sent over total observed, formatted as "NN.NN%".
    pub success_rate: String,
    /// Breaker state per configured transport, in fallback order.
    pub providers: Vec<ProviderSnapshot>,
}

/// Per-transport breaker statistics included in [`EngineSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSnapshot {
    /// Transport name.
    pub name: Arc<str>,
    /// Current circuit breaker state.
    pub breaker_state: BreakerState,
    /// Consecutive-failure counter of the breaker.
    pub failure_count: u32,
}

/// Current unix timestamp in seconds.
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

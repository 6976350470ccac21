//! Transport adapter capability and reference mock.
//!
//! A transport is anything that can attempt delivery of a message exactly
//! once per call and report the result. The engine never inspects a
//! transport beyond its stable name; retry, fallback, and circuit breaking
//! all happen on the engine side.

use std::{
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use rand::Rng;
use tokio::time::Duration;

use crate::{error::TransportError, types::Message};

/// What a transport returns when it accepts a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportReceipt {
    /// Transport-assigned delivery identifier.
    pub delivery_id: String,
    /// RFC 3339 completion timestamp.
    pub timestamp: String,
    /// Name of the transport that produced this receipt.
    pub transport: String,
}

/// Capability every pluggable delivery provider satisfies.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Stable name, unique across the configured provider set.
    fn name(&self) -> &str;

    /// Attempt delivery of a message.
    ///
    /// # Errors
    ///
    /// Signals a transient failure with a human-readable description. The
    /// engine treats every failure as retriable until the retry budget is
    /// exhausted.
    async fn attempt(&self, message: &Message) -> Result<TransportReceipt, TransportError>;
}

/// Reference transport with tunable failure rate and latency.
///
/// Intended for tests and example drivers: it never talks to a network,
/// counts its invocations, and assigns sequential delivery ids.
#[derive(Debug)]
pub struct MockTransport {
    name: Arc<str>,
    failure_rate: f64,
    latency: Duration,
    invocations: AtomicU32,
    sequence: AtomicU64,
}

impl MockTransport {
    /// Create a mock transport.
    ///
    /// `failure_rate` is the probability in `[0, 1]` that an attempt fails;
    /// `0.0` always delivers, `1.0` always fails.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, failure_rate: f64, latency: Duration) -> Self {
        Self {
            name: name.into(),
            failure_rate,
            latency,
            invocations: AtomicU32::new(0),
            sequence: AtomicU64::new(0),
        }
    }

    /// How many times `attempt` has been invoked.
    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }

    fn should_fail(&self) -> bool {
        if self.failure_rate >= 1.0 {
            return true;
        }
        if self.failure_rate <= 0.0 {
            return false;
        }
        rand::rng().random_range(0.0..1.0) < self.failure_rate
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(&self, message: &Message) -> Result<TransportReceipt, TransportError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;

        if self.should_fail() {
            return Err(TransportError::transient(format!(
                "simulated delivery failure for {} via {}",
                message.to, self.name
            )));
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        Ok(TransportReceipt {
            delivery_id: format!("{}-{sequence:08x}", self.name),
            timestamp: chrono::Utc::now().to_rfc3339(),
            transport: self.name.to_string(),
        })
    }
}

//! The send coordinator.
//!
//! Sequences fingerprinting, idempotency lookup, rate-limited admission,
//! breaker-gated dispatch with bounded retry and ordered fallback, registry
//! updates, and event emission. Also owns the drain worker that reprocesses
//! rate-denied submissions.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::{
    sync::broadcast,
    time::{Duration, interval},
};

use crate::{
    Signal,
    circuit_breaker::CircuitBreaker,
    config::EngineConfig,
    error::{EngineError, Result, TransportError},
    events::{EngineEvent, EventBus},
    queue::DeferredQueue,
    rate_limiter::RateLimiter,
    registry::DeliveryRegistry,
    transport::Transport,
    types::{
        AttemptOutcome, AttemptRecord, DeliveryReceipt, DeliveryState, DeliveryStatus,
        EngineSnapshot, Fingerprint, Message, ProviderSnapshot, SubmitOutcome, unix_now,
    },
};

/// Top-level orchestrator for outbound submissions.
///
/// All methods take `&self`; shared state lives behind fine-grained locks,
/// so a `Coordinator` wrapped in an [`Arc`] serves concurrent submitters and
/// the drain worker simultaneously.
#[derive(Debug)]
pub struct Coordinator {
    config: EngineConfig,
    providers: Vec<Arc<dyn Transport>>,
    /// Provider names in fallback order, shared with breaker keys.
    names: Vec<Arc<str>>,
    breakers: CircuitBreaker,
    limiter: RateLimiter,
    queue: DeferredQueue,
    registry: DeliveryRegistry,
    events: EventBus,
    /// Fingerprints with a dispatch currently in flight. Guards at-most-once
    /// delivery against concurrent submissions of the same message.
    inflight: DashMap<Fingerprint, ()>,
}

impl Coordinator {
    /// Create a coordinator over an ordered provider list.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] when two providers share a
    /// name; breaker state and attempt accounting are keyed by name.
    pub fn new(config: EngineConfig, providers: Vec<Arc<dyn Transport>>) -> Result<Self> {
        let mut seen = ahash::AHashSet::with_capacity(providers.len());
        let mut names = Vec::with_capacity(providers.len());
        for provider in &providers {
            let name: Arc<str> = Arc::from(provider.name());
            if !seen.insert(name.clone()) {
                return Err(EngineError::Configuration(format!(
                    "duplicate transport name: {name}"
                )));
            }
            names.push(name);
        }

        Ok(Self {
            breakers: CircuitBreaker::new(config.breaker.clone()),
            limiter: RateLimiter::new(config.rate_limit.clone()),
            queue: DeferredQueue::new(),
            registry: DeliveryRegistry::new(),
            events: EventBus::new(),
            inflight: DashMap::new(),
            config,
            providers,
            names,
        })
    }

    /// The event bus, for subscribing to `sent`/`failed`/`queued` events.
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Submit a message for delivery.
    ///
    /// Resolves to [`SubmitOutcome::Sent`] (possibly replayed from the
    /// idempotency cache), [`SubmitOutcome::Queued`] when rate-denied, or
    /// [`SubmitOutcome::Failed`] after exhausting every transport.
    ///
    /// # Errors
    ///
    /// Only for malformed messages; transport failures never surface as
    /// `Err`.
    pub async fn submit(&self, message: Message) -> Result<SubmitOutcome> {
        message.validate()?;
        let fingerprint = message.fingerprint();

        if let Some(receipt) = self.registry.cached_receipt(&fingerprint) {
            tracing::debug!(fingerprint = %fingerprint, "duplicate submission, replaying cached receipt");
            return Ok(SubmitOutcome::Sent(receipt));
        }

        // A dispatch for this fingerprint is already running; park the
        // duplicate without burning an admission. The drain worker resolves
        // it against the cache later.
        if self.inflight.contains_key(&fingerprint) {
            return Ok(self.park(message, fingerprint));
        }

        if let Err(wait) = self.limiter.try_admit() {
            tracing::info!(
                fingerprint = %fingerprint,
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "rate limit reached, submission deferred"
            );
            return Ok(self.park(message, fingerprint));
        }

        match self.dispatch(message.clone(), fingerprint.clone()).await {
            Some(outcome) => Ok(outcome),
            // Lost the in-flight race to a concurrent dispatch
            None => Ok(self.park(message, fingerprint)),
        }
    }

    /// Append a submission to the deferred queue and announce it.
    ///
    /// The status moves to queued unless a dispatch for the fingerprint is
    /// already mid-flight, in which case that dispatch keeps ownership of
    /// the status entry.
    fn park(&self, message: Message, fingerprint: Fingerprint) -> SubmitOutcome {
        self.registry.mark_queued(&fingerprint);
        self.queue.push(message.clone(), fingerprint.clone());
        self.events.emit(&EngineEvent::Queued {
            fingerprint: fingerprint.clone(),
            message,
        });
        SubmitOutcome::Queued(fingerprint)
    }

    /// Current status for a fingerprint, if it was ever observed.
    pub fn lookup_status(&self, fingerprint: &Fingerprint) -> Option<DeliveryStatus> {
        self.registry.status(fingerprint)
    }

    /// Point-in-time statistics.
    #[allow(clippy::cast_precision_loss, reason = "counts are far below 2^52")]
    pub fn snapshot(&self) -> EngineSnapshot {
        let total_observed = self.registry.total_observed();
        let sent = self.registry.count_in_state(DeliveryState::Sent);
        let failed = self.registry.count_in_state(DeliveryState::Failed);
        let queued = self.registry.count_in_state(DeliveryState::Queued);

        let rate = if total_observed == 0 {
            0.0
        } else {
            sent as f64 / total_observed as f64 * 100.0
        };

        EngineSnapshot {
            total_observed,
            sent,
            failed,
            queued,
            success_rate: format!("{rate:.2}%"),
            providers: self
                .names
                .iter()
                .map(|name| {
                    let stats = self.breakers.stats(name);
                    ProviderSnapshot {
                        name: name.clone(),
                        breaker_state: stats.state,
                        failure_count: stats.failure_count,
                    }
                })
                .collect(),
        }
    }

    /// Number of submissions parked in the deferred queue.
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Run the drain worker until shutdown.
    ///
    /// Wakes on a coarse cadence and, while the rate limiter admits, pops
    /// deferred submissions and dispatches them directly (never back through
    /// the admission front door, which would double-admit).
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) {
        tracing::debug!(
            interval_ms = self.config.drain_interval_ms,
            "drain worker starting"
        );

        let mut timer = interval(Duration::from_millis(self.config.drain_interval_ms));
        // Skip the first tick to avoid immediate execution
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.drain_pass().await;
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown) => {
                            tracing::debug!("drain worker shutting down");
                        }
                        Err(e) => {
                            tracing::error!("drain worker shutdown channel error: {e}");
                        }
                    }
                    break;
                }
            }
        }
    }

    /// Drain deferred submissions until the queue empties or admission is
    /// denied for this pass.
    async fn drain_pass(&self) {
        let mut drained = 0_usize;
        loop {
            if self.queue.is_empty() {
                break;
            }
            if self.limiter.try_admit().is_err() {
                tracing::debug!(pending = self.queue.len(), "drain pass rate-denied, deferring");
                break;
            }
            let Some(entry) = self.queue.pop() else {
                break;
            };
            match self
                .dispatch(entry.message.clone(), entry.fingerprint.clone())
                .await
            {
                Some(outcome) => {
                    tracing::debug!(fingerprint = %outcome.fingerprint(), "drained deferred submission");
                    drained += 1;
                }
                None => {
                    // Still in flight elsewhere; retry on a later pass
                    self.queue.push(entry.message, entry.fingerprint);
                    break;
                }
            }
        }
        if drained > 0 {
            tracing::info!(drained, "drain pass complete");
        }
    }

    /// Dispatch a message, assuming admission was already granted.
    ///
    /// Returns `None` when another dispatch for the same fingerprint is in
    /// flight; the caller decides how to defer.
    async fn dispatch(&self, message: Message, fingerprint: Fingerprint) -> Option<SubmitOutcome> {
        // A queued duplicate may have been delivered since it was parked
        if let Some(receipt) = self.registry.cached_receipt(&fingerprint) {
            tracing::debug!(fingerprint = %fingerprint, "fingerprint already delivered, skipping dispatch");
            return Some(SubmitOutcome::Sent(receipt));
        }

        if self.inflight.insert(fingerprint.clone(), ()).is_some() {
            return None;
        }
        let outcome = self.attempt_providers(message, fingerprint.clone()).await;
        self.inflight.remove(&fingerprint);
        Some(outcome)
    }

    /// Walk the provider list in fallback order with bounded retry, breaker
    /// gating, and backoff between attempts.
    async fn attempt_providers(&self, message: Message, fingerprint: Fingerprint) -> SubmitOutcome {
        self.registry.mark_pending(&fingerprint);

        let mut total_attempts = 0_u32;
        let mut last_error: Option<String> = None;

        for (provider, name) in self.providers.iter().zip(&self.names) {
            let mut attempt = 0_u32;
            loop {
                if !self.breakers.try_acquire(name) {
                    self.registry.record_attempt(
                        &fingerprint,
                        AttemptRecord {
                            transport: name.clone(),
                            ordinal: attempt + 1,
                            outcome: AttemptOutcome::BreakerOpen,
                            timestamp: unix_now(),
                        },
                    );
                    tracing::warn!(
                        transport = %name,
                        fingerprint = %fingerprint,
                        "circuit open, falling back to next transport"
                    );
                    break;
                }

                self.registry
                    .begin_attempt(&fingerprint, name, attempt + 1, total_attempts == 0);
                total_attempts += 1;

                let result = match tokio::time::timeout(
                    Duration::from_millis(self.config.attempt_timeout_ms),
                    provider.attempt(&message),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::transient(format!(
                        "delivery attempt timed out after {}ms",
                        self.config.attempt_timeout_ms
                    ))),
                };

                match result {
                    Ok(transport_receipt) => {
                        self.breakers.record_success(name);
                        let receipt = DeliveryReceipt {
                            fingerprint: fingerprint.clone(),
                            delivery_id: transport_receipt.delivery_id,
                            transport: name.clone(),
                            completed_at: transport_receipt.timestamp,
                            attempts: total_attempts,
                        };
                        self.registry.record_attempt(
                            &fingerprint,
                            AttemptRecord {
                                transport: name.clone(),
                                ordinal: attempt + 1,
                                outcome: AttemptOutcome::Delivered,
                                timestamp: unix_now(),
                            },
                        );
                        self.registry.mark_sent(&fingerprint, &receipt);
                        tracing::info!(
                            fingerprint = %fingerprint,
                            transport = %name,
                            delivery_id = %receipt.delivery_id,
                            attempts = total_attempts,
                            "message delivered"
                        );
                        self.events.emit(&EngineEvent::Sent {
                            fingerprint,
                            message,
                            receipt: receipt.clone(),
                        });
                        return SubmitOutcome::Sent(receipt);
                    }
                    Err(error) => {
                        self.breakers.record_failure(name);
                        let description = error.to_string();
                        self.registry.record_attempt(
                            &fingerprint,
                            AttemptRecord {
                                transport: name.clone(),
                                ordinal: attempt + 1,
                                outcome: AttemptOutcome::TransientFailure(description.clone()),
                                timestamp: unix_now(),
                            },
                        );
                        tracing::warn!(
                            fingerprint = %fingerprint,
                            transport = %name,
                            attempt = attempt + 1,
                            error = %description,
                            "delivery attempt failed"
                        );
                        last_error = Some(description);

                        if self.config.retry.is_last_attempt(attempt) {
                            // Exhausted this transport, fall back without waiting
                            break;
                        }
                        tokio::time::sleep(self.config.retry.backoff_delay(attempt)).await;
                        attempt += 1;
                    }
                }
            }
        }

        let error =
            last_error.unwrap_or_else(|| "no transport was available to attempt delivery".to_string());
        self.registry
            .mark_failed(&fingerprint, self.config.retry.total_attempts(), &error);
        tracing::error!(
            fingerprint = %fingerprint,
            attempts = total_attempts,
            error = %error,
            "all transports exhausted"
        );
        self.events.emit(&EngineEvent::Failed {
            fingerprint: fingerprint.clone(),
            message,
            last_error: error.clone(),
        });
        SubmitOutcome::Failed {
            fingerprint,
            last_error: error,
        }
    }
}

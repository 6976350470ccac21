//! Per-transport circuit breakers to short-circuit failing providers
//!
//! The circuit breaker has three states:
//! - **Closed**: normal operation, calls pass through
//! - **Open**: the transport tripped on consecutive failures, calls are
//!   refused immediately until the cooldown elapses
//! - **Half-Open**: cooldown elapsed, probe calls are allowed to test
//!   recovery
//!
//! A breaker refusal is distinguishable from a transport failure: the
//! coordinator falls back to the next transport immediately without
//! consuming that transport's retry budget.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the circuit stays open before probing recovery (milliseconds).
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_cooldown_ms() -> u64 {
    60_000
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation.
    Closed,
    /// Tripped; calls refused until the cooldown elapses.
    Open,
    /// Probing recovery.
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        };
        f.write_str(s)
    }
}

/// Per-transport breaker state.
#[derive(Debug)]
struct BreakerData {
    /// Current state of the circuit.
    state: BreakerState,
    /// Consecutive-failure counter. Reset when the circuit opens, so a
    /// half-open circuit re-opens only once the threshold is crossed again.
    failure_count: u32,
    /// Earliest instant at which an open circuit will admit a probe.
    retry_at: Option<Instant>,
    /// A half-open probe is outstanding; further callers are refused until
    /// it resolves, so exactly one probe is in flight at a time.
    probe_in_flight: bool,
}

impl BreakerData {
    const fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            retry_at: None,
            probe_in_flight: false,
        }
    }

    /// Check whether a call may pass through, transitioning Open → HalfOpen
    /// once the cooldown has elapsed.
    fn try_acquire(&mut self, transport: &str) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => {
                if self.probe_in_flight {
                    false
                } else {
                    self.probe_in_flight = true;
                    true
                }
            }
            BreakerState::Open => {
                let elapsed = self.retry_at.is_none_or(|at| Instant::now() >= at);
                if elapsed {
                    self.state = BreakerState::HalfOpen;
                    self.probe_in_flight = true;
                    tracing::info!(
                        transport = %transport,
                        "circuit breaker entering half-open state, probing recovery"
                    );
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&mut self, transport: &str) {
        if self.state == BreakerState::HalfOpen {
            tracing::info!(transport = %transport, "circuit breaker closed, normal operation resumed");
        }
        self.state = BreakerState::Closed;
        self.failure_count = 0;
        self.retry_at = None;
        self.probe_in_flight = false;
    }

    fn record_failure(&mut self, transport: &str, config: &CircuitBreakerConfig) {
        self.probe_in_flight = false;
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => {
                self.failure_count += 1;
                if self.failure_count >= config.failure_threshold {
                    self.state = BreakerState::Open;
                    self.failure_count = 0;
                    self.retry_at = Some(Instant::now() + Duration::from_millis(config.cooldown_ms));
                    tracing::warn!(
                        transport = %transport,
                        threshold = config.failure_threshold,
                        cooldown_ms = config.cooldown_ms,
                        "circuit breaker opened, refusing calls"
                    );
                }
            }
            BreakerState::Open => {}
        }
    }
}

/// Per-transport circuit breaker manager.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    breakers: DashMap<Arc<str>, Arc<parking_lot::Mutex<BreakerData>>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker manager.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    fn get_breaker(&self, transport: &Arc<str>) -> Arc<parking_lot::Mutex<BreakerData>> {
        self.breakers
            .entry(transport.clone())
            .or_insert_with(|| Arc::new(parking_lot::Mutex::new(BreakerData::new())))
            .clone()
    }

    /// Check whether a call to this transport may proceed.
    ///
    /// Returns `false` while the circuit is open and inside its cooldown.
    pub fn try_acquire(&self, transport: &Arc<str>) -> bool {
        let breaker = self.get_breaker(transport);
        let mut guard = breaker.lock();
        guard.try_acquire(transport)
    }

    /// Record a successful call, closing the circuit.
    pub fn record_success(&self, transport: &Arc<str>) {
        let breaker = self.get_breaker(transport);
        let mut guard = breaker.lock();
        guard.record_success(transport);
    }

    /// Record a failed call, opening the circuit at the failure threshold.
    pub fn record_failure(&self, transport: &Arc<str>) {
        let breaker = self.get_breaker(transport);
        let mut guard = breaker.lock();
        guard.record_failure(transport, &self.config);
    }

    /// Current statistics for a transport's breaker.
    pub fn stats(&self, transport: &Arc<str>) -> BreakerStats {
        let breaker = self.get_breaker(transport);
        let guard = breaker.lock();
        BreakerStats {
            state: guard.state,
            failure_count: guard.failure_count,
        }
    }
}

/// Circuit breaker statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerStats {
    /// Current circuit state.
    pub state: BreakerState,
    /// Consecutive-failure counter.
    pub failure_count: u32,
}

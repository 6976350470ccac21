//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::{circuit_breaker::CircuitBreakerConfig, rate_limiter::RateLimitConfig, retry::RetryPolicy};

/// Aggregate configuration for the coordinator.
///
/// Every field has a sensible default, so `EngineConfig::default()` is a
/// working starting point and partial deserialization fills in the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Retry policy applied per transport.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Global admission rate limit.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Per-transport circuit breaker settings.
    #[serde(default)]
    pub breaker: CircuitBreakerConfig,

    /// Drain worker wake interval in milliseconds.
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,

    /// Upper bound on a single transport attempt in milliseconds; overruns
    /// surface as transient failures.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            rate_limit: RateLimitConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            drain_interval_ms: default_drain_interval_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }
}

const fn default_drain_interval_ms() -> u64 {
    1_000
}

const fn default_attempt_timeout_ms() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.rate_limit.window_ms, 60_000);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.cooldown_ms, 60_000);
        assert_eq!(config.drain_interval_ms, 1_000);
        assert_eq!(config.attempt_timeout_ms, 30_000);
    }
}

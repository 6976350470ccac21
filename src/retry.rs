//! Retry policy with exponential backoff and jitter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

/// Retry policy applied per transport during a dispatch.
///
/// `max_retries` counts retries AFTER the first attempt, so each transport
/// is invoked at most `max_retries + 1` times before fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries per transport after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff (milliseconds).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any single backoff delay (milliseconds).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    1_000
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

impl RetryPolicy {
    /// Total attempts a single transport receives.
    #[must_use]
    pub const fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Whether the 0-based attempt index is the last one for a transport.
    #[must_use]
    pub const fn is_last_attempt(&self, attempt: u32) -> bool {
        attempt >= self.max_retries
    }

    /// Backoff delay before retrying after the 0-based attempt index.
    ///
    /// `delay = min(max_delay, base · 2^attempt + jitter)` with jitter drawn
    /// uniformly from `[0, 0.1 · base · 2^attempt)`.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss, reason = "delay is clamped non-negative")]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        // 2^63 would overflow the multiplier
        let raw = if attempt >= 63 {
            u64::MAX
        } else {
            self.base_delay_ms.saturating_mul(1_u64 << attempt)
        };

        let jitter_range = (raw as f64) * 0.1;
        let jitter = if jitter_range > 0.0 {
            rand::rng().random_range(0.0..jitter_range)
        } else {
            0.0
        };

        let delay = ((raw as f64) + jitter).min(self.max_delay_ms as f64);
        Duration::from_millis(delay as u64)
    }
}

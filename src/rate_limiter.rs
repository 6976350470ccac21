//! Global admission control using a sliding-window log
//!
//! Every admission timestamp inside the current window is kept in an ordered
//! ledger. An admission is granted only while the ledger holds fewer than
//! `max_requests` entries, which bounds the send rate over any rolling
//! window of `window_ms`. Ledger mutation is serialized under a single lock,
//! so concurrent admissions cannot overshoot the ceiling.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

/// Configuration for rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Admissions allowed per window.
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,

    /// Window length in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
        }
    }
}

const fn default_max_requests() -> usize {
    100
}

const fn default_window_ms() -> u64 {
    60_000
}

/// Sliding-window-log rate limiter, shared by submissions and the drain
/// worker.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    ledger: parking_lot::Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            ledger: parking_lot::Mutex::new(VecDeque::new()),
        }
    }

    const fn window(&self) -> Duration {
        Duration::from_millis(self.config.window_ms)
    }

    /// Attempt admission, recording it in the ledger on success.
    ///
    /// # Errors
    ///
    /// Denied admissions return the advisory time until the oldest ledger
    /// entry leaves the window.
    pub fn try_admit(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let window = self.window();
        let mut ledger = self.ledger.lock();

        while let Some(oldest) = ledger.front() {
            if now.duration_since(*oldest) >= window {
                ledger.pop_front();
            } else {
                break;
            }
        }

        if ledger.len() >= self.config.max_requests {
            let wait = ledger
                .front()
                .map_or(Duration::ZERO, |oldest| {
                    window.saturating_sub(now.duration_since(*oldest))
                });
            drop(ledger);
            tracing::debug!(
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "rate limit reached, admission denied"
            );
            Err(wait)
        } else {
            ledger.push_back(now);
            Ok(())
        }
    }

    /// Advisory time until the next ledger entry expires; zero when the
    /// ledger is empty.
    pub fn wait_hint(&self) -> Duration {
        let now = Instant::now();
        let ledger = self.ledger.lock();
        ledger.front().map_or(Duration::ZERO, |oldest| {
            self.window().saturating_sub(now.duration_since(*oldest))
        })
    }

    /// Number of admissions currently inside the window.
    pub fn admitted_in_window(&self) -> usize {
        let now = Instant::now();
        let window = self.window();
        let ledger = self.ledger.lock();
        ledger
            .iter()
            .filter(|admitted| now.duration_since(**admitted) < window)
            .count()
    }
}

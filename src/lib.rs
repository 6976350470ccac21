//! Resilient send coordination for outbound messages
//!
//! This crate provides the core engine of an outbound-message service:
//! - Duplicate suppression via per-message fingerprints and an idempotent
//!   result cache
//! - Bounded retry with exponential backoff and ordered provider fallback
//! - Per-transport circuit breakers to short-circuit failing providers
//! - Sliding-window rate limiting with a deferred queue and drain worker
//! - Status tracking and event emission for every observed submission
//!
//! Transports are plugged in as capabilities (see [`transport::Transport`]);
//! the engine owns everything between accepting a message and handing it to
//! at most one transport, at most once per unique message.

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod circuit_breaker;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod queue;
pub mod rate_limiter;
pub mod registry;
pub mod retry;
pub mod transport;
pub mod types;

pub use circuit_breaker::{BreakerState, BreakerStats, CircuitBreaker, CircuitBreakerConfig};
pub use config::EngineConfig;
pub use coordinator::Coordinator;
pub use error::{EngineError, Result, TransportError};
pub use events::{EngineEvent, EventBus, EventKind, SubscriberId};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use retry::RetryPolicy;
pub use transport::{MockTransport, Transport, TransportReceipt};
pub use types::{
    AttemptOutcome, AttemptRecord, DeliveryReceipt, DeliveryState, DeliveryStatus, EngineSnapshot,
    Fingerprint, Message, ProviderSnapshot, SubmitOutcome,
};

/// Control signal delivered over the shutdown broadcast channel.
#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Shutdown,
}

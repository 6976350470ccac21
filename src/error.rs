//! Typed error handling for the send-coordination engine.
//!
//! Transport failures are deliberately NOT part of [`EngineError`]: they are
//! absorbed by the retry/fallback machinery and surface to callers only as a
//! [`crate::types::SubmitOutcome::Failed`] outcome. `EngineError` covers the
//! things the caller did wrong.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Caller-facing engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The submitted message is malformed (e.g. empty destination).
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The engine was constructed with an invalid configuration.
    #[error("invalid engine configuration: {0}")]
    Configuration(String),
}

/// A transient delivery failure signalled by a transport adapter.
///
/// The engine treats every transport failure as retriable until the retry
/// budget is exhausted; a permanent/transient split is a future extension
/// and would live here.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    /// Create a transient error with a human-readable description.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_displays_description() {
        let err = TransportError::transient("connection reset by peer");
        assert_eq!(err.to_string(), "connection reset by peer");
    }

    #[test]
    fn engine_error_displays_context() {
        let err = EngineError::InvalidMessage("empty destination".to_string());
        assert_eq!(err.to_string(), "invalid message: empty destination");
    }
}

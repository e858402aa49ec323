//! The `error` module defines the error types used within `pipebus`.
//!
//! Only caller mistakes are represented here. A missed acknowledgment is not an
//! error (duplicate acks are expected under at-least-once delivery) and a
//! failing handler is recovered by its consumer loop, so neither ever reaches
//! the caller of a broker operation.

use std::fmt;

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Which registry a duplicate name collided in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Topic,
    Subscription,
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameKind::Topic => f.write_str("topic"),
            NameKind::Subscription => f.write_str("subscription"),
        }
    }
}

/// Errors surfaced by the broker to its callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("topic '{0}' not found")]
    UnknownTopic(String),

    #[error("subscription '{0}' not found")]
    UnknownSubscription(String),

    #[error("{kind} '{name}' already exists")]
    DuplicateName { kind: NameKind, name: String },

    #[error("subscription '{subscription}' is bound to topic '{bound}', not '{requested}'")]
    TopicMismatch {
        subscription: String,
        bound: String,
        requested: String,
    },

    #[error("broker is shutting down")]
    ShuttingDown,
}

/// Failure reported by a message handler.
///
/// The consumer loop logs it and leaves the message pending so it is
/// redelivered on a later pull.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct HandlerError {
    reason: String,
}

impl HandlerError {
    pub fn new(reason: impl fmt::Display) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl From<String> for HandlerError {
    fn from(reason: String) -> Self {
        Self { reason }
    }
}

impl From<&str> for HandlerError {
    fn from(reason: &str) -> Self {
        Self::new(reason)
    }
}

impl From<BrokerError> for HandlerError {
    fn from(err: BrokerError) -> Self {
        Self::new(err)
    }
}

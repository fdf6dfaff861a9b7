//! Consumer error types.

use shared_bus::TransportError;
use shared_types::{DecodeError, EnvelopeError};
use std::any::Any;
use std::time::Duration;
use thiserror::Error;

/// A handler rejected or failed to process a message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerFault(pub String);

impl HandlerFault {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    /// Build a fault from the payload of a handler that panicked.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let reason = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self(format!("handler panicked: {reason}"))
    }
}

/// Ledger failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// The per-key lock was not granted within the wait.
    #[error("Lock on {key} not acquired within {waited:?}")]
    LockTimeout { key: String, waited: Duration },

    /// The backing store failed.
    #[error("Ledger storage error: {0}")]
    Storage(String),
}

/// Why one delivery was not consumed.
///
/// Returned to the worker for logging; acknowledgement has already been
/// settled by the time the caller sees this.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Outer frame unparsable. Nacked without requeue.
    #[error(transparent)]
    MalformedEnvelope(#[from] EnvelopeError),

    /// Known tag, unparsable payload. Recorded failed.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The handler failed. Recorded failed.
    #[error("Handler for {type_tag} failed: {fault}")]
    HandlerFault { type_tag: String, fault: HandlerFault },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Ack/nack could not be delivered.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DispatchError {
    /// Returns true if the per-key lock was not granted in time.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, DispatchError::Ledger(LedgerError::LockTimeout { .. }))
    }
}

//! # Transport Errors

use shared_types::EnvelopeError;
use std::time::Duration;
use thiserror::Error;

/// Errors from the broker transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The broker could not be reached.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The connection was closed (locally or by the broker) while in use.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No message arrived within the wait.
    #[error("No message within {0:?}")]
    Timeout(Duration),

    /// Publish or bind against an exchange that was never declared.
    #[error("Exchange {0} not found")]
    ExchangeNotFound(String),

    /// Consume or bind against a queue that does not exist (or was deleted).
    #[error("Queue {0} not found")]
    QueueNotFound(String),

    /// The queue is exclusive to another connection.
    #[error("Queue {0} is exclusive to another connection")]
    ExclusiveQueueLocked(String),

    /// An exchange was redeclared with a different kind.
    #[error("Exchange {name} already declared as {existing}")]
    ExchangeKindMismatch { name: String, existing: String },

    /// Ack/nack for a delivery tag this connection does not hold.
    #[error("Unknown delivery tag {0}")]
    UnknownDelivery(u64),
}

impl TransportError {
    /// Returns true for [`TransportError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }

    /// Returns true if the connection can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::Connection(_) | TransportError::ConnectionClosed
        )
    }
}

/// Errors from [`Publisher`](crate::Publisher).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    /// The message could not be framed.
    #[error(transparent)]
    Encode(#[from] EnvelopeError),

    /// The broker refused the publish.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

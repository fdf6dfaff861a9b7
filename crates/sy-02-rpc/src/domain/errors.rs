//! RPC error types.
//!
//! Only two errors ever escape `RpcClient::request`: a failed setup
//! ([`RpcError::Connection`]) and a reply of a type the client never
//! registered ([`RpcError::UnhandledMessage`]). Everything else is an
//! [`RpcFault`], handed to the error adapter and returned as a failed
//! response.

use shared_bus::TransportError;
use shared_types::{DecodeError, EnvelopeError, ErrorMessage};
use std::time::Duration;
use thiserror::Error;

/// Errors raised to RPC callers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RpcError {
    /// Could not connect or declare the reply queue.
    #[error("RPC setup failed: {0}")]
    Connection(TransportError),

    /// The reply carried a tag with no registered decoder.
    ///
    /// `error` holds the payload decoded as an [`ErrorMessage`], if it is one.
    #[error("Unhandled reply type {type_tag}")]
    UnhandledMessage {
        type_tag: String,
        error: Option<ErrorMessage>,
    },
}

/// Late-stage failures, adapted into a `success = false` response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcFault {
    /// No reply before the deadline.
    #[error("No reply within {0:?}")]
    Timeout(Duration),

    /// The broker failed while publishing or waiting.
    #[error("Transport fault: {0}")]
    Transport(TransportError),

    /// The request could not be framed.
    #[error("Request encoding failed: {0}")]
    Encode(EnvelopeError),

    /// The reply's outer frame was unparsable.
    #[error("Malformed reply: {0}")]
    MalformedReply(EnvelopeError),

    /// The reply's payload did not decode with its registered decoder.
    #[error(transparent)]
    Decode(DecodeError),
}

impl RpcFault {
    /// Machine-readable code, used as `ErrorDetail::code`.
    pub fn code(&self) -> &'static str {
        match self {
            RpcFault::Timeout(_) => "timeout",
            RpcFault::Transport(_) => "transport",
            RpcFault::Encode(_) => "encode",
            RpcFault::MalformedReply(_) => "malformed_reply",
            RpcFault::Decode(_) => "decode",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcFault::Timeout(_))
    }
}

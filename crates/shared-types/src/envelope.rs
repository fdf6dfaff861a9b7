//! # Envelope Codec
//!
//! The outer frame for every message that crosses the broker.
//!
//! ## Wire Shape
//!
//! ```text
//! {"type": "Commands::CreateUser", "message": "<base64 inner payload>"}
//! ```
//!
//! The `message` bytes are produced by the domain codec and are opaque here.
//! This module only frames and unframes; it knows nothing about registries
//! or handlers.

use crate::errors::{EncodeError, EnvelopeError};
use crate::message::Message;
use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;

/// A type tag plus the opaque inner payload.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Tag selecting the decoder (and handler) for `message`.
    #[serde(rename = "type")]
    pub type_tag: String,

    /// Inner payload, encoded by the domain codec.
    #[serde_as(as = "Base64")]
    pub message: Vec<u8>,
}

impl Envelope {
    /// Frame already-encoded payload bytes.
    pub fn new(type_tag: impl Into<String>, message: Vec<u8>) -> Self {
        Self {
            type_tag: type_tag.into(),
            message,
        }
    }

    /// Encode a domain message and frame it under its own tag.
    pub fn from_message<M: Message>(message: &M) -> Result<Self, EncodeError> {
        Ok(Self::new(message.type_tag(), message.encode()?))
    }

    /// Serialize the frame to wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Encode(e.to_string()))
    }

    /// Parse wire bytes into a frame.
    ///
    /// # Errors
    ///
    /// - `EnvelopeError::Malformed` - not a `{type, message}` object, or the
    ///   payload is not valid base64
    /// - `EnvelopeError::EmptyTypeTag` - the tag is blank
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Envelope =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

        if envelope.type_tag.trim().is_empty() {
            return Err(EnvelopeError::EmptyTypeTag);
        }

        Ok(envelope)
    }
}

/// Encode a domain message straight to wire bytes.
pub fn encode<M: Message>(message: &M) -> Result<Vec<u8>, EnvelopeError> {
    Envelope::from_message(message)
        .map_err(|e| EnvelopeError::Encode(e.to_string()))?
        .to_bytes()
}

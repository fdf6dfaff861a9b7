//! # Error Types
//!
//! Errors raised by the envelope codec, the domain codec and the type registry.

use thiserror::Error;

/// The outer frame of a delivery could not be parsed.
///
/// A malformed envelope is never retried by the consumer: the bytes will not
/// become parseable on redelivery.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The bytes are not a `{type, message}` frame.
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// The frame parsed but carries an empty type tag.
    #[error("Malformed envelope: empty type tag")]
    EmptyTypeTag,

    /// The envelope could not be serialized.
    #[error("Envelope encoding failed: {0}")]
    Encode(String),
}

/// The inner payload could not be decoded with the decoder registered for its tag.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Failed to decode {type_tag}: {reason}")]
pub struct DecodeError {
    /// Tag the payload was decoded as.
    pub type_tag: String,
    /// Underlying codec message.
    pub reason: String,
}

impl DecodeError {
    /// Create a decode error for a tag.
    pub fn new(type_tag: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            reason: reason.into(),
        }
    }
}

/// The inner payload could not be encoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Failed to encode {type_tag}: {reason}")]
pub struct EncodeError {
    /// Tag of the message being encoded.
    pub type_tag: String,
    /// Underlying codec message.
    pub reason: String,
}

/// Registry configuration errors. Raised at setup, never during dispatch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A second registration for the same tag.
    #[error("Type {type_tag} is already registered")]
    DuplicateType { type_tag: String },

    /// Tags must be non-empty.
    #[error("Type tag cannot be empty")]
    EmptyTypeTag,
}

/// Configuration loading and validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("Failed to read config {path}: {error}")]
    Io { path: String, error: String },

    /// Config file could not be parsed.
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// An environment override could not be parsed.
    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    /// A field has an unusable value.
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

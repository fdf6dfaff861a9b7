//! # Message Model
//!
//! The seam between the framing layer and the domain codec.
//!
//! Concrete messages implement [`Message`]. Registries and dispatch work on
//! the object-safe [`ErasedMessage`] so that one registry can hold decoders
//! for many message types; typed code gets its message back with
//! [`downcast_ref`](trait.ErasedMessage.html#method.downcast_ref) or
//! [`downcast`](trait.ErasedMessage.html#method.downcast).
//!
//! The default domain codec is `serde_json`. A message with a different inner
//! encoding overrides [`Message::encode`] and [`Message::decode`].

use crate::correlation::CorrelationId;
use crate::errors::{DecodeError, EncodeError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt::Debug;
use uuid::Uuid;

/// A typed domain message that can travel inside an [`Envelope`](crate::Envelope).
pub trait Message: Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static {
    /// Tag written into the envelope `type` field.
    const TYPE: &'static str;

    /// Tag of this instance. Only generic carriers override this.
    fn type_tag(&self) -> &str {
        Self::TYPE
    }

    /// Unique id of this message, if the schema carries one.
    fn uuid(&self) -> Option<Uuid> {
        None
    }

    /// Correlation id, if the schema carries one.
    fn correlation_id(&self) -> Option<CorrelationId> {
        None
    }

    /// Reply destination, for request messages.
    fn reply_to(&self) -> Option<&str> {
        None
    }

    /// Stamp the reply destination onto a request. No-op for schemas without one.
    fn set_reply_to(&mut self, _reply_to: &str) {}

    /// Encode with the domain codec.
    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        serde_json::to_vec(self).map_err(|e| EncodeError {
            type_tag: Self::TYPE.to_string(),
            reason: e.to_string(),
        })
    }

    /// Decode with the domain codec.
    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(bytes).map_err(|e| DecodeError::new(Self::TYPE, e.to_string()))
    }
}

/// Object-safe view of any [`Message`].
pub trait ErasedMessage: Debug + Send + Sync + 'static {
    fn type_tag(&self) -> &str;
    fn uuid(&self) -> Option<Uuid>;
    fn correlation_id(&self) -> Option<CorrelationId>;
    fn reply_to(&self) -> Option<&str>;
    fn encode(&self) -> Result<Vec<u8>, EncodeError>;
    /// JSON rendering for structured logs.
    fn to_json(&self) -> serde_json::Value;
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
}

impl<M: Message> ErasedMessage for M {
    fn type_tag(&self) -> &str {
        Message::type_tag(self)
    }

    fn uuid(&self) -> Option<Uuid> {
        Message::uuid(self)
    }

    fn correlation_id(&self) -> Option<CorrelationId> {
        Message::correlation_id(self)
    }

    fn reply_to(&self) -> Option<&str> {
        Message::reply_to(self)
    }

    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        Message::encode(self)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }
}

impl dyn ErasedMessage {
    /// Returns true if the concrete type is `M`.
    pub fn is<M: Message>(&self) -> bool {
        self.as_any().is::<M>()
    }

    /// Borrow as the concrete type.
    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.as_any().downcast_ref::<M>()
    }

    /// Take ownership as the concrete type, or get the box back on mismatch.
    pub fn downcast<M: Message>(self: Box<Self>) -> Result<Box<M>, Box<dyn ErasedMessage>> {
        if !self.is::<M>() {
            return Err(self);
        }
        match self.into_any().downcast::<M>() {
            Ok(message) => Ok(message),
            // `is` checked above
            Err(_) => unreachable!("type check passed but downcast failed"),
        }
    }
}

/// A decoded message of some registered type.
pub type DecodedMessage = Box<dyn ErasedMessage>;

/// Decodes an inner payload into a message. One per registered tag.
pub type Decoder = fn(&[u8]) -> Result<DecodedMessage, DecodeError>;

fn decode_erased<M: Message>(bytes: &[u8]) -> Result<DecodedMessage, DecodeError> {
    Ok(Box::new(M::decode(bytes)?))
}

/// The decoder for a concrete message type.
pub fn decoder_for<M: Message>() -> Decoder {
    decode_erased::<M>
}

/// Schema-less carrier for payloads whose tag has no registered decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericMessage {
    /// Tag the payload arrived under.
    pub type_tag: String,
    /// Best-effort JSON view of the payload. `Null` if it was not JSON.
    pub body: serde_json::Value,
}

impl GenericMessage {
    /// Decode any payload without a schema. Never fails.
    pub fn decode_lossy(type_tag: &str, bytes: &[u8]) -> Self {
        let body = serde_json::from_slice(bytes).unwrap_or(serde_json::Value::Null);
        Self {
            type_tag: type_tag.to_string(),
            body,
        }
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.body.get(name).and_then(serde_json::Value::as_str)
    }
}

impl Message for GenericMessage {
    const TYPE: &'static str = "Switchyard::GenericMessage";

    fn type_tag(&self) -> &str {
        &self.type_tag
    }

    fn uuid(&self) -> Option<Uuid> {
        self.field("uuid").and_then(|s| Uuid::parse_str(s).ok())
    }

    fn correlation_id(&self) -> Option<CorrelationId> {
        self.field("correlation_id")
            .and_then(|s| CorrelationId::parse(s).ok())
    }

    fn reply_to(&self) -> Option<&str> {
        self.field("reply_to")
    }

    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        serde_json::to_vec(&self.body).map_err(|e| EncodeError {
            type_tag: self.type_tag.clone(),
            reason: e.to_string(),
        })
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let body = serde_json::from_slice(bytes)
            .map_err(|e| DecodeError::new(Self::TYPE, e.to_string()))?;
        Ok(Self {
            type_tag: Self::TYPE.to_string(),
            body,
        })
    }
}

/// One entry of an [`ErrorMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable code, e.g. `"timeout"`.
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// Where the error originated, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Domain-shaped error value. Adapted RPC failures and error replies use this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    pub errors: Vec<ErrorDetail>,
    /// The request or payload that caused the error, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl ErrorMessage {
    /// An error message with a single entry.
    pub fn single(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            correlation_id: None,
            errors: vec![ErrorDetail {
                code: code.into(),
                message: message.into(),
                source: None,
            }],
            context: None,
        }
    }

    /// Attach a correlation id.
    pub fn with_correlation_id(mut self, correlation_id: Option<CorrelationId>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Attach context.
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Code of the first entry.
    pub fn code(&self) -> Option<&str> {
        self.errors.first().map(|e| e.code.as_str())
    }
}

impl Message for ErrorMessage {
    const TYPE: &'static str = "Switchyard::ErrorMessage";

    fn uuid(&self) -> Option<Uuid> {
        Some(self.uuid)
    }

    fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }
}

//! Consumption records and message keys.

use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;
use sha2::{Digest, Sha256};
use shared_bus::DeliveryMeta;
use shared_types::{CorrelationId, Envelope};
use std::fmt;
use uuid::Uuid;

/// Unix timestamp in milliseconds.
pub type Timestamp = u64;

/// Outcome of consuming one logical message.
///
/// ```text
/// [Pending] ──handler ok──→ [Success]
///     │
///     └──handler fault / decode failure──→ [Failed] ──redelivery──→ ...
///
/// (no registration) ──→ [UnknownType]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumptionStatus {
    Pending,
    Success,
    Failed,
    UnknownType,
}

impl fmt::Display for ConsumptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConsumptionStatus::Pending => "pending",
            ConsumptionStatus::Success => "success",
            ConsumptionStatus::Failed => "failed",
            ConsumptionStatus::UnknownType => "unknown_type",
        };
        f.write_str(s)
    }
}

/// Stable identity of a logical message across redeliveries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageKey(String);

impl MessageKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive the key for a delivery.
    ///
    /// Precedence: the broker `message_id` property, then the message's own
    /// uuid, then `sha256(type || 0x00 || message)` of the envelope.
    pub fn derive(meta: &DeliveryMeta, message_uuid: Option<Uuid>, envelope: &Envelope) -> Self {
        if let Some(id) = meta
            .properties
            .message_id
            .as_deref()
            .filter(|id| !id.is_empty())
        {
            return Self(id.to_string());
        }
        if let Some(uuid) = message_uuid {
            return Self(uuid.to_string());
        }
        Self::content_hash(envelope)
    }

    /// Hash of the envelope's tag and inner payload.
    pub fn content_hash(envelope: &Envelope) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(envelope.type_tag.as_bytes());
        hasher.update([0u8]);
        hasher.update(&envelope.message);
        Self(format!("sha256:{}", hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ledger record for one logical message.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedMessage {
    pub id: MessageKey,
    pub correlation_id: Option<CorrelationId>,
    /// Inner payload exactly as received.
    #[serde_as(as = "Base64")]
    pub encoded_message: Vec<u8>,
    /// Envelope tag the payload arrived under.
    pub message_type: String,
    pub status: ConsumptionStatus,
    pub exchange: String,
    pub queue: String,
    /// Handler invocations so far.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ConsumedMessage {
    /// Returns true once the handler has run to completion for this key.
    pub fn is_consumed(&self) -> bool {
        self.status == ConsumptionStatus::Success
    }

    pub fn mark_success(&mut self) {
        self.status = ConsumptionStatus::Success;
        self.last_error = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = ConsumptionStatus::Failed;
        self.last_error = Some(error.into());
    }

    pub fn mark_unknown_type(&mut self) {
        self.status = ConsumptionStatus::UnknownType;
    }
}

/// What the dispatch loop knows about a delivery when it first sees it.
#[derive(Debug, Clone)]
pub struct NewConsumedMessage {
    pub id: MessageKey,
    pub correlation_id: Option<CorrelationId>,
    pub encoded_message: Vec<u8>,
    pub message_type: String,
    pub exchange: String,
    pub queue: String,
}

impl NewConsumedMessage {
    /// Build from a delivery. The correlation id falls back to the delivery
    /// properties when the message carries none.
    pub fn from_delivery(
        id: MessageKey,
        envelope: &Envelope,
        meta: &DeliveryMeta,
        correlation_id: Option<CorrelationId>,
    ) -> Self {
        Self {
            id,
            correlation_id: correlation_id.or(meta.properties.correlation_id),
            encoded_message: envelope.message.clone(),
            message_type: envelope.type_tag.clone(),
            exchange: meta.exchange.clone(),
            queue: meta.queue.clone(),
        }
    }

    /// A fresh `Pending` record stamped at `now`.
    pub fn into_record(self, now: Timestamp) -> ConsumedMessage {
        ConsumedMessage {
            id: self.id,
            correlation_id: self.correlation_id,
            encoded_message: self.encoded_message,
            message_type: self.message_type,
            status: ConsumptionStatus::Pending,
            exchange: self.exchange,
            queue: self.queue,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

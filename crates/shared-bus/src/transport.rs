//! # Transport Ports
//!
//! The broker as seen by the consumer and the RPC client. Implementations
//! wrap a real AMQP-style broker; [`InMemoryBroker`](crate::InMemoryBroker)
//! is the reference implementation used by tests.
//!
//! ## Semantics expected from every implementation
//!
//! - `create_exchange` / `create_queue` / `bind_queue` are idempotent.
//! - `publish` is fire-and-forget: success means the broker accepted the
//!   bytes, not that anybody consumed them.
//! - `check_for_message` blocks the calling task (never the thread) until a
//!   delivery arrives or the timeout elapses.
//! - Deliveries stay unacknowledged until `ack`/`nack`; unacknowledged
//!   deliveries are requeued when the connection goes away.
//! - Exclusive and auto-delete queues die with the connection that declared
//!   them.
//! - `disconnect` is best-effort and always safe to call, repeatedly.

use crate::errors::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared_types::CorrelationId;
use std::sync::Arc;
use std::time::Duration;

/// The default exchange. Routes straight to the queue named by the routing key.
pub const DEFAULT_EXCHANGE: &str = "";

/// Routing behaviour of an exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Every bound queue gets a copy.
    #[default]
    Fanout,
    /// Bound queues whose binding key equals the routing key get a copy.
    Direct,
}

impl std::fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeKind::Fanout => write!(f, "fanout"),
            ExchangeKind::Direct => write!(f, "direct"),
        }
    }
}

/// Queue declaration options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOptions {
    /// Queue name. Empty asks the broker to generate one.
    pub name: String,
    /// Survives broker restarts.
    pub durable: bool,
    /// Usable only by the declaring connection; deleted with it.
    pub exclusive: bool,
    /// Deleted when the declaring connection goes away.
    pub auto_delete: bool,
}

impl QueueOptions {
    /// A named, durable, shared queue.
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }

    /// A broker-named, exclusive, auto-deleting queue for one caller's replies.
    pub fn private_reply() -> Self {
        Self {
            name: String::new(),
            durable: false,
            exclusive: true,
            auto_delete: true,
        }
    }
}

/// Message properties carried alongside the body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishProperties {
    pub message_id: Option<String>,
    pub correlation_id: Option<CorrelationId>,
    pub reply_to: Option<String>,
}

/// Everything known about a delivery besides its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryMeta {
    /// Connection-scoped tag used to ack/nack.
    pub delivery_tag: u64,
    /// Exchange the message was published to.
    pub exchange: String,
    pub routing_key: String,
    /// Queue the message was consumed from.
    pub queue: String,
    /// Set when the message was requeued at least once.
    pub redelivered: bool,
    pub properties: PublishProperties,
}

/// A message pulled from a queue.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub meta: DeliveryMeta,
    pub body: Vec<u8>,
}

/// Settles deliveries.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Positive acknowledgement: the broker forgets the delivery.
    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError>;

    /// Negative acknowledgement. `requeue` makes it eligible for redelivery.
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), TransportError>;
}

/// One open connection to the broker.
#[async_trait]
pub trait Connection: Acknowledger {
    /// Broker-unique id of this connection.
    fn id(&self) -> u64;

    /// Returns false once disconnected or severed.
    fn is_open(&self) -> bool;

    async fn create_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), TransportError>;

    /// Declare a queue and return its (possibly generated) name.
    async fn create_queue(&self, options: QueueOptions) -> Result<String, TransportError>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TransportError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        properties: PublishProperties,
    ) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the next delivery on `queue`.
    ///
    /// # Errors
    ///
    /// - `TransportError::Timeout` - nothing arrived in time
    /// - `TransportError::ConnectionClosed` - the connection went away mid-wait
    async fn check_for_message(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Delivery, TransportError>;

    /// Close the connection. Best-effort; safe to call more than once.
    async fn disconnect(&self);
}

/// Entry point to a broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a new, independent connection.
    ///
    /// # Errors
    ///
    /// - `TransportError::Connection` - the broker is unreachable
    async fn connect(&self) -> Result<Arc<dyn Connection>, TransportError>;
}

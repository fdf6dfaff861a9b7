//! # Publisher
//!
//! Fire-and-forget publishing of typed messages.
//!
//! The exchange is declared on first use. A failed publish is returned to
//! the caller and never retried here.

use crate::errors::{PublishError, TransportError};
use crate::transport::{Broker, Connection, ExchangeKind, PublishProperties};
use shared_types::{encode, Message};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;
use uuid::Uuid;

/// Publishes messages to one exchange over one connection.
pub struct Publisher {
    connection: Arc<dyn Connection>,
    exchange: String,
    kind: ExchangeKind,
    declared: OnceCell<()>,
}

impl Publisher {
    /// Wrap an open connection.
    pub fn new(
        connection: Arc<dyn Connection>,
        exchange: impl Into<String>,
        kind: ExchangeKind,
    ) -> Self {
        Self {
            connection,
            exchange: exchange.into(),
            kind,
            declared: OnceCell::new(),
        }
    }

    /// Open a dedicated connection and wrap it.
    ///
    /// # Errors
    ///
    /// - `TransportError::Connection` - the broker is unreachable
    pub async fn connect(
        broker: &dyn Broker,
        exchange: impl Into<String>,
        kind: ExchangeKind,
    ) -> Result<Self, TransportError> {
        let connection = broker.connect().await?;
        Ok(Self::new(connection, exchange, kind))
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Publish with an empty routing key (fanout).
    ///
    /// Returns the `message_id` the message was published under.
    pub async fn publish<M: Message>(&self, message: &M) -> Result<String, PublishError> {
        self.publish_with_key("", message).await
    }

    /// Publish with an explicit routing key.
    pub async fn publish_with_key<M: Message>(
        &self,
        routing_key: &str,
        message: &M,
    ) -> Result<String, PublishError> {
        let body = encode(message)?;

        self.declared
            .get_or_try_init(|| self.connection.create_exchange(&self.exchange, self.kind))
            .await?;

        let message_id = message
            .uuid()
            .unwrap_or_else(Uuid::new_v4)
            .to_string();
        let properties = PublishProperties {
            message_id: Some(message_id.clone()),
            correlation_id: message.correlation_id(),
            reply_to: message.reply_to().map(str::to_string),
        };

        self.connection
            .publish(&self.exchange, routing_key, body, properties)
            .await?;

        debug!(
            exchange = %self.exchange,
            type_tag = message.type_tag(),
            message_id = %message_id,
            "Message published"
        );
        Ok(message_id)
    }

    /// Close the underlying connection.
    pub async fn close(&self) {
        self.connection.disconnect().await;
    }
}

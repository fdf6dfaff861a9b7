//! # RPC Client
//!
//! Synchronous request/reply semantics over the asynchronous broker.
//!
//! ```text
//! connect ──→ declare private reply queue ──→ stamp reply_to ──→ publish
//!                                                                   │
//!      ┌──────────────────── wait on reply queue until deadline ←───┘
//!      │
//!      ├─ registered tag      ──→ RpcResponse { success: true }
//!      ├─ ErrorMessage        ──→ RpcResponse { success: false }
//!      ├─ unregistered tag    ──→ Err(RpcError::UnhandledMessage)
//!      ├─ deadline passed     ──→ adapted timeout, success: false
//!      └─ any other fault     ──→ adapted fault, success: false
//!
//! disconnect on every path (drops the reply queue)
//! ```
//!
//! Each call owns its connection and reply queue, so concurrent calls never
//! see each other's replies and a slow call never blocks another.

use crate::adapters::DefaultErrorAdapter;
use crate::domain::{RpcClientConfig, RpcError, RpcFault, RpcResponse};
use crate::ports::{ErrorAdapter, RequestContext};
use shared_bus::{
    Acknowledger, Broker, Connection, PublishProperties, QueueOptions, TransportError,
};
use shared_types::{
    decoder_for, encode, CorrelationId, Decoder, Envelope, ErrorMessage, Lookup, Message,
    RegistryError, TypeRegistry,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Issues requests and waits for their correlated replies.
pub struct RpcClient {
    broker: Arc<dyn Broker>,
    config: RpcClientConfig,
    registry: TypeRegistry,
    adapter: Arc<dyn ErrorAdapter>,
}

impl RpcClient {
    /// Client with the [`DefaultErrorAdapter`]. `ErrorMessage` replies are
    /// understood out of the box and resolve as failures.
    pub fn new(broker: Arc<dyn Broker>, config: RpcClientConfig) -> Self {
        let mut registry = TypeRegistry::new("rpc-client");
        // Fresh registry, cannot collide
        let _ = registry.register_type::<ErrorMessage>(None);

        Self {
            broker,
            config,
            registry,
            adapter: Arc::new(DefaultErrorAdapter),
        }
    }

    pub fn with_error_adapter(mut self, adapter: Arc<dyn ErrorAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn config(&self) -> &RpcClientConfig {
        &self.config
    }

    /// Accept replies of type `M`.
    ///
    /// # Errors
    ///
    /// - `RegistryError::DuplicateType` - `M::TYPE` is already registered
    pub fn register_response_type<M: Message>(&mut self) -> Result<(), RegistryError> {
        self.registry.register(M::TYPE, decoder_for::<M>(), None)
    }

    /// Accept replies tagged `type_tag`, decoded with `decoder`.
    pub fn register_response_decoder(
        &mut self,
        type_tag: impl Into<String>,
        decoder: Decoder,
    ) -> Result<(), RegistryError> {
        self.registry.register(type_tag, decoder, None)
    }

    pub fn registered_types(&self) -> BTreeSet<String> {
        self.registry.registered_tags()
    }

    /// [`request_with_timeout`](Self::request_with_timeout) with the
    /// configured default timeout.
    pub async fn request<M: Message>(&self, message: M) -> Result<RpcResponse, RpcError> {
        self.request_with_timeout(message, self.config.default_timeout)
            .await
    }

    /// Publish `message` and wait up to `timeout` for its reply.
    ///
    /// Timeouts and late-stage faults come back as `Ok` with
    /// `success = false`; they are never raised.
    ///
    /// # Errors
    ///
    /// - `RpcError::Connection` - connecting or declaring the reply queue failed
    /// - `RpcError::UnhandledMessage` - the reply's tag is not registered
    pub async fn request_with_timeout<M: Message>(
        &self,
        mut message: M,
        timeout: Duration,
    ) -> Result<RpcResponse, RpcError> {
        let deadline = Instant::now() + timeout;
        let connection = self.broker.connect().await.map_err(RpcError::Connection)?;

        let result = self
            .call(connection.as_ref(), &mut message, timeout, deadline)
            .await;

        connection.disconnect().await;
        result
    }

    async fn call<M: Message>(
        &self,
        connection: &dyn Connection,
        message: &mut M,
        timeout: Duration,
        deadline: Instant,
    ) -> Result<RpcResponse, RpcError> {
        let reply_queue = match self.declare_reply_queue(connection).await {
            Ok(queue) => queue,
            Err(e) => {
                warn!(
                    exchange = %self.config.exchange,
                    type_tag = message.type_tag(),
                    error = %e,
                    "Failed to set up reply queue"
                );
                return Err(RpcError::Connection(e));
            }
        };

        message.set_reply_to(&reply_queue);
        let correlation_id = CorrelationId::new();

        let body = match encode(&*message) {
            Ok(body) => body,
            Err(e) => return Ok(self.adapt(&RpcFault::Encode(e), None, &*message, correlation_id)),
        };

        info!(
            exchange = %self.config.exchange,
            routing_key = %self.config.routing_key,
            type_tag = message.type_tag(),
            correlation_id = %correlation_id,
            reply_to = %reply_queue,
            "Sending request"
        );

        let properties = PublishProperties {
            message_id: Some(Uuid::new_v4().to_string()),
            correlation_id: Some(correlation_id),
            reply_to: Some(reply_queue.clone()),
        };
        if let Err(e) = connection
            .publish(&self.config.exchange, &self.config.routing_key, body, properties)
            .await
        {
            return Ok(self.adapt(&RpcFault::Transport(e), None, &*message, correlation_id));
        }

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(self.adapt(&RpcFault::Timeout(timeout), None, &*message, correlation_id));
            }

            let delivery = match connection.check_for_message(&reply_queue, remaining).await {
                Ok(delivery) => delivery,
                Err(TransportError::Timeout(_)) => {
                    return Ok(self.adapt(
                        &RpcFault::Timeout(timeout),
                        None,
                        &*message,
                        correlation_id,
                    ));
                }
                Err(e) => {
                    return Ok(self.adapt(&RpcFault::Transport(e), None, &*message, correlation_id));
                }
            };

            if let Err(e) = connection.ack(delivery.meta.delivery_tag).await {
                debug!(error = %e, "Failed to ack reply");
            }

            match delivery.meta.properties.correlation_id {
                Some(reply_id) if reply_id != correlation_id => {
                    warn!(
                        expected = %correlation_id,
                        received = %reply_id,
                        "Discarding reply for another request"
                    );
                    continue;
                }
                _ => return self.resolve(&delivery.body, &*message, correlation_id),
            }
        }
    }

    async fn declare_reply_queue(
        &self,
        connection: &dyn Connection,
    ) -> Result<String, TransportError> {
        connection
            .create_exchange(&self.config.exchange, self.config.exchange_kind)
            .await?;
        connection.create_queue(QueueOptions::private_reply()).await
    }

    /// Decode and classify a reply.
    fn resolve<M: Message>(
        &self,
        body: &[u8],
        request: &M,
        correlation_id: CorrelationId,
    ) -> Result<RpcResponse, RpcError> {
        let envelope = match Envelope::decode(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                return Ok(self.adapt(
                    &RpcFault::MalformedReply(e),
                    Some(body),
                    request,
                    correlation_id,
                ))
            }
        };

        info!(
            exchange = %self.config.exchange,
            type_tag = %envelope.type_tag,
            correlation_id = %correlation_id,
            "Handling response"
        );

        match self.registry.lookup(&envelope.type_tag) {
            Lookup::Matched { decoder, .. } => match decoder(&envelope.message) {
                Ok(reply) if reply.is::<ErrorMessage>() => Ok(RpcResponse::failure(reply)),
                Ok(reply) => Ok(RpcResponse::success(reply)),
                Err(e) => Ok(self.adapt(
                    &RpcFault::Decode(e),
                    Some(&envelope.message),
                    request,
                    correlation_id,
                )),
            },
            Lookup::Unmatched => {
                let error = ErrorMessage::decode(&envelope.message).ok();
                warn!(
                    exchange = %self.config.exchange,
                    type_tag = %envelope.type_tag,
                    correlation_id = %correlation_id,
                    "Reply type not registered"
                );
                Err(RpcError::UnhandledMessage {
                    type_tag: envelope.type_tag,
                    error,
                })
            }
        }
    }

    fn adapt<M: Message>(
        &self,
        fault: &RpcFault,
        payload: Option<&[u8]>,
        request: &M,
        correlation_id: CorrelationId,
    ) -> RpcResponse {
        warn!(
            exchange = %self.config.exchange,
            type_tag = request.type_tag(),
            correlation_id = %correlation_id,
            error = %fault,
            "Request failed"
        );

        let context = RequestContext {
            request,
            correlation_id,
            exchange: &self.config.exchange,
            routing_key: &self.config.routing_key,
            payload,
        };
        RpcResponse::failure(self.adapter.adapt(fault, &context))
    }
}

//! # RPC Server
//!
//! The responding side of a call: pulls requests from the shared request
//! queue, runs the registered [`Responder`], and publishes the reply to the
//! caller's private queue through the default exchange, tagged with the
//! request's correlation id.

use crate::domain::RpcServerConfig;
use crate::ports::Responder;
use async_trait::async_trait;
use shared_bus::{
    Acknowledger, Broker, Connection, Delivery, PublishProperties, QueueOptions, TransportError,
    DEFAULT_EXCHANGE,
};
use shared_types::{
    decoder_for, encode, CorrelationId, DecodedMessage, Envelope, ErrorMessage, Lookup, Message,
    RegistryError, TypeRegistry,
};
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Type-erased responder: request in, encoded reply envelope out.
#[async_trait]
trait ErasedResponder: Send + Sync {
    async fn respond(&self, request: DecodedMessage) -> Result<Vec<u8>, ErrorMessage>;
}

struct TypedResponder<M, R> {
    responder: R,
    _request: PhantomData<fn() -> M>,
}

#[async_trait]
impl<M, R> ErasedResponder for TypedResponder<M, R>
where
    M: Message,
    R: Responder<M>,
{
    async fn respond(&self, request: DecodedMessage) -> Result<Vec<u8>, ErrorMessage> {
        let request = request.downcast::<M>().map_err(|other| {
            ErrorMessage::single(
                "internal",
                format!("responder for {} received {}", M::TYPE, other.type_tag()),
            )
        })?;
        let reply = self.responder.respond(*request).await?;
        encode(&reply).map_err(|e| ErrorMessage::single("encode", e.to_string()))
    }
}

/// Answers requests for the registered types.
pub struct RpcServer {
    config: RpcServerConfig,
    registry: TypeRegistry<Arc<dyn ErasedResponder>>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig) -> Self {
        Self {
            config,
            registry: TypeRegistry::new("rpc-server"),
        }
    }

    pub fn config(&self) -> &RpcServerConfig {
        &self.config
    }

    /// Answer requests of type `M` with `responder`.
    ///
    /// # Errors
    ///
    /// - `RegistryError::DuplicateType` - `M::TYPE` already has a responder
    pub fn register<M, R>(&mut self, responder: R) -> Result<(), RegistryError>
    where
        M: Message,
        R: Responder<M> + 'static,
    {
        let responder: Arc<dyn ErasedResponder> = Arc::new(TypedResponder::<M, R> {
            responder,
            _request: PhantomData,
        });
        self.registry
            .register(M::TYPE, decoder_for::<M>(), Some(responder))
    }

    pub fn registered_types(&self) -> BTreeSet<String> {
        self.registry.registered_tags()
    }

    /// Declare the request exchange, queue and binding. Idempotent.
    pub async fn declare(&self, connection: &dyn Connection) -> Result<(), TransportError> {
        let config = &self.config;
        connection
            .create_queue(QueueOptions::durable(config.queue.clone()))
            .await?;
        if config.exchange != DEFAULT_EXCHANGE {
            connection
                .create_exchange(&config.exchange, config.exchange_kind)
                .await?;
            connection
                .bind_queue(&config.queue, &config.exchange, &config.routing_key)
                .await?;
        }
        Ok(())
    }

    /// Answer one request and settle it.
    ///
    /// Requests without a reply address are acked and dropped. Unknown
    /// types and undecodable payloads are answered with an `ErrorMessage`.
    ///
    /// # Errors
    ///
    /// - `TransportError` - the reply could not be published (the request is
    ///   requeued) or the request could not be settled
    pub async fn handle_request(
        &self,
        connection: &dyn Connection,
        delivery: &Delivery,
    ) -> Result<(), TransportError> {
        let meta = &delivery.meta;
        let envelope = Envelope::decode(&delivery.body);

        let (reply, origin) = match &envelope {
            Err(e) => {
                warn!(queue = %meta.queue, error = %e, "Malformed request");
                (
                    Err(ErrorMessage::single("malformed_request", e.to_string())),
                    (None, None),
                )
            }
            Ok(envelope) => self.answer(envelope).await,
        };

        let correlation_id = meta.properties.correlation_id.or(origin.0);
        let reply_to = meta
            .properties
            .reply_to
            .clone()
            .or(origin.1);

        let Some(reply_to) = reply_to else {
            warn!(
                queue = %meta.queue,
                correlation_id = ?correlation_id,
                "Request has no reply address, dropping"
            );
            return connection.ack(meta.delivery_tag).await;
        };

        let body = match reply {
            Ok(body) => body,
            Err(error) => match encode(&error.with_correlation_id(correlation_id)) {
                Ok(body) => body,
                Err(e) => {
                    error!(error = %e, "Failed to encode error reply");
                    return connection.ack(meta.delivery_tag).await;
                }
            },
        };

        let properties = PublishProperties {
            message_id: Some(Uuid::new_v4().to_string()),
            correlation_id,
            reply_to: None,
        };
        if let Err(e) = connection
            .publish(DEFAULT_EXCHANGE, &reply_to, body, properties)
            .await
        {
            warn!(reply_to = %reply_to, error = %e, "Failed to publish reply");
            connection.nack(meta.delivery_tag, true).await?;
            return Err(e);
        }

        debug!(reply_to = %reply_to, correlation_id = ?correlation_id, "Reply sent");
        connection.ack(meta.delivery_tag).await
    }

    /// Decode and run the responder. Returns the reply (or error) plus the
    /// request's own correlation id and reply address.
    async fn answer(
        &self,
        envelope: &Envelope,
    ) -> (
        Result<Vec<u8>, ErrorMessage>,
        (Option<CorrelationId>, Option<String>),
    ) {
        let (decoder, responder) = match self.registry.lookup(&envelope.type_tag) {
            Lookup::Matched { decoder, handler } => (decoder, handler.cloned()),
            Lookup::Unmatched => {
                warn!(type_tag = %envelope.type_tag, "No responder for request type");
                return (
                    Err(ErrorMessage::single(
                        "unhandled_message",
                        format!("no responder for {}", envelope.type_tag),
                    )),
                    (None, None),
                );
            }
        };

        let request = match decoder(&envelope.message) {
            Ok(request) => request,
            Err(e) => {
                warn!(type_tag = %envelope.type_tag, error = %e, "Undecodable request");
                return (
                    Err(ErrorMessage::single("decode", e.to_string())),
                    (None, None),
                );
            }
        };

        let origin = (
            request.correlation_id(),
            request.reply_to().map(str::to_string),
        );
        info!(type_tag = %envelope.type_tag, "Handling request");

        let reply = match responder {
            Some(responder) => responder.respond(request).await,
            None => Err(ErrorMessage::single(
                "unhandled_message",
                format!("no responder for {}", envelope.type_tag),
            )),
        };
        (reply, origin)
    }

    /// Serve until `shutdown` turns true (or its sender is dropped).
    ///
    /// # Errors
    ///
    /// - `TransportError` - connecting or declaring failed, or the
    ///   connection was lost
    pub async fn run(
        &self,
        broker: &dyn Broker,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        let connection = broker.connect().await?;
        if let Err(e) = self.declare(connection.as_ref()).await {
            connection.disconnect().await;
            return Err(e);
        }
        info!(queue = %self.config.queue, "RPC server listening");

        let outcome = loop {
            if *shutdown.borrow() {
                break Ok(());
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break Ok(());
                    }
                }

                result = connection.check_for_message(&self.config.queue, self.config.poll_interval) => match result {
                    Ok(delivery) => {
                        if let Err(e) = self.handle_request(connection.as_ref(), &delivery).await {
                            warn!(error = %e, "Request not answered");
                        }
                    }
                    Err(TransportError::Timeout(_)) => {}
                    Err(e) if e.is_fatal() => break Err(e),
                    Err(e) => {
                        warn!(error = %e, "Polling failed");
                        tokio::time::sleep(self.config.poll_interval).await;
                    }
                }
            }
        };

        connection.disconnect().await;
        outcome
    }
}

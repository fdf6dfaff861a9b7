//! # Consumer Service
//!
//! The per-delivery dispatch pipeline.
//!
//! ```text
//! bytes ──decode──→ Envelope ──lookup──┬─ Matched ──decode──→ lock ──→ invoke ──→ persist ──→ ack
//!   │                                  │                 │         │
//!   │                                  │                 │         └─ already success ──→ ack
//!   │                                  │                 └─ DecodeError ──→ persist failed ──→ nack
//!   │                                  └─ Unmatched ──→ lock ──→ persist unknown_type ──→ ack
//!   └─ MalformedEnvelope ──→ nack (no requeue)
//! ```
//!
//! Every record mutation happens under the ledger's per-key lock, and the
//! delivery is settled only after the outcome is persisted.

use crate::domain::{
    ConsumedMessage, ConsumerConfig, DispatchError, HandlerFault, LedgerError, MessageKey,
    NewConsumedMessage,
};
use crate::handlers::TypedHandler;
use crate::ports::{ConsumptionLedger, ErasedHandler, LedgerLock, MessageHandler};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::FutureExt;
use shared_bus::{Acknowledger, Connection, DeliveryMeta, QueueOptions, TransportError};
use shared_types::{
    decoder_for, CorrelationId, Decoder, Envelope, GenericMessage, Lookup, Message, RegistryError,
    TypeRegistry,
};
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Registry of handlers plus the ledger they are guarded by.
///
/// Registration takes `&mut self` and happens before the consumer is shared;
/// dispatch takes `&self` and is safe to run from many workers at once.
pub struct Consumer {
    config: ConsumerConfig,
    registry: TypeRegistry<Arc<dyn ErasedHandler>>,
    ledger: Arc<dyn ConsumptionLedger>,
}

impl Consumer {
    pub fn new(config: ConsumerConfig, ledger: Arc<dyn ConsumptionLedger>) -> Self {
        Self {
            config,
            registry: TypeRegistry::new("consumer"),
            ledger,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<dyn ConsumptionLedger> {
        &self.ledger
    }

    /// Register a typed handler for `M::TYPE`.
    ///
    /// # Errors
    ///
    /// - `RegistryError::DuplicateType` - `M::TYPE` already has a registration
    pub fn register<M, H>(&mut self, handler: H) -> Result<(), RegistryError>
    where
        M: Message,
        H: MessageHandler<M> + 'static,
    {
        let handler: Arc<dyn ErasedHandler> = Arc::new(TypedHandler::<M, H>::new(handler));
        self.registry
            .register(M::TYPE, decoder_for::<M>(), Some(handler))
    }

    /// Register a decoder and an optional untyped handler for a tag.
    ///
    /// A tag registered without a handler is decoded and recorded as
    /// consumed without invoking anything.
    pub fn register_raw(
        &mut self,
        type_tag: impl Into<String>,
        decoder: Decoder,
        handler: Option<Arc<dyn ErasedHandler>>,
    ) -> Result<(), RegistryError> {
        self.registry.register(type_tag, decoder, handler)
    }

    pub fn registered_types(&self) -> BTreeSet<String> {
        self.registry.registered_tags()
    }

    /// Declare the exchange, the queue and the binding this consumer reads.
    /// Idempotent.
    pub async fn declare(&self, connection: &dyn Connection) -> Result<(), TransportError> {
        let config = &self.config;
        connection
            .create_exchange(&config.exchange, config.exchange_kind)
            .await?;
        connection
            .create_queue(QueueOptions {
                name: config.queue.clone(),
                durable: config.durable,
                exclusive: false,
                auto_delete: false,
            })
            .await?;
        connection
            .bind_queue(&config.queue, &config.exchange, &config.routing_key)
            .await
    }

    /// Process one delivery and settle it through `acker`.
    ///
    /// Side effects (ledger writes, ack/nack) are the contract; the returned
    /// error only tells the caller what went wrong so it can be logged.
    pub async fn handle_delivery<A>(
        &self,
        acker: &A,
        body: &[u8],
        meta: &DeliveryMeta,
    ) -> Result<(), DispatchError>
    where
        A: Acknowledger + ?Sized,
    {
        let envelope = match Envelope::decode(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(
                    exchange = %meta.exchange,
                    queue = %meta.queue,
                    delivery_tag = meta.delivery_tag,
                    payload = %BASE64.encode(body),
                    error = %e,
                    "Malformed envelope"
                );
                return Err(self.reject(acker, meta, false, e.into()).await);
            }
        };

        match self.registry.lookup(&envelope.type_tag) {
            Lookup::Unmatched => self.quarantine(acker, &envelope, meta).await,
            Lookup::Matched { decoder, handler } => {
                self.dispatch(acker, &envelope, meta, decoder, handler)
                    .await
            }
        }
    }

    /// Unregistered tag: record `unknown_type` and ack. Not an error.
    async fn quarantine<A>(
        &self,
        acker: &A,
        envelope: &Envelope,
        meta: &DeliveryMeta,
    ) -> Result<(), DispatchError>
    where
        A: Acknowledger + ?Sized,
    {
        let generic = GenericMessage::decode_lossy(&envelope.type_tag, &envelope.message);
        let key = MessageKey::derive(meta, generic.uuid(), envelope);

        let lock = self.acquire(acker, &key, envelope, meta).await?;
        let new = NewConsumedMessage::from_delivery(
            key.clone(),
            envelope,
            meta,
            generic.correlation_id(),
        );
        let outcome = self
            .record(new, |record| {
                if !record.is_consumed() {
                    record.mark_unknown_type();
                }
            })
            .await;
        drop(lock);

        if let Err(e) = outcome {
            return Err(self.reject(acker, meta, true, e.into()).await);
        }

        warn!(
            exchange = %meta.exchange,
            queue = %meta.queue,
            type_tag = %envelope.type_tag,
            message_key = %key,
            "Unregistered message type recorded as unknown_type"
        );
        acker.ack(meta.delivery_tag).await?;
        Ok(())
    }

    async fn dispatch<A>(
        &self,
        acker: &A,
        envelope: &Envelope,
        meta: &DeliveryMeta,
        decoder: Decoder,
        handler: Option<&Arc<dyn ErasedHandler>>,
    ) -> Result<(), DispatchError>
    where
        A: Acknowledger + ?Sized,
    {
        let message = match decoder(&envelope.message) {
            Ok(message) => message,
            Err(e) => return self.record_decode_failure(acker, envelope, meta, e).await,
        };

        let key = MessageKey::derive(meta, message.uuid(), envelope);
        let correlation_id: Option<CorrelationId> = message.correlation_id();

        let lock = self.acquire(acker, &key, envelope, meta).await?;
        let new = NewConsumedMessage::from_delivery(key.clone(), envelope, meta, correlation_id);
        let mut record = match self.ledger.find_or_create(new).await {
            Ok(record) => record,
            Err(e) => {
                drop(lock);
                return Err(self.reject(acker, meta, true, e.into()).await);
            }
        };

        if record.is_consumed() {
            drop(lock);
            debug!(
                type_tag = %envelope.type_tag,
                message_key = %key,
                redelivered = meta.redelivered,
                "Message already consumed, skipping"
            );
            acker.ack(meta.delivery_tag).await?;
            return Ok(());
        }

        let outcome = match handler {
            Some(handler) => {
                record.attempts += 1;
                // A panic is a failed attempt, not a dead worker
                AssertUnwindSafe(handler.invoke(message))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(HandlerFault::from_panic(payload)))
            }
            None => Ok(()),
        };

        match outcome {
            Ok(()) => record.mark_success(),
            Err(ref fault) => record.mark_failed(fault.to_string()),
        }
        let persisted = self.ledger.persist(&record).await;
        drop(lock);

        if let Err(e) = persisted {
            error!(
                type_tag = %envelope.type_tag,
                message_key = %key,
                status = %record.status,
                error = %e,
                "Failed to persist consumption outcome"
            );
            return Err(self.reject(acker, meta, true, e.into()).await);
        }

        match outcome {
            Ok(()) => {
                info!(
                    exchange = %meta.exchange,
                    queue = %meta.queue,
                    type_tag = %envelope.type_tag,
                    message_key = %key,
                    "Message consumed"
                );
                acker.ack(meta.delivery_tag).await?;
                Ok(())
            }
            Err(fault) => {
                error!(
                    exchange = %meta.exchange,
                    queue = %meta.queue,
                    type_tag = %envelope.type_tag,
                    message_key = %key,
                    attempts = record.attempts,
                    payload = %BASE64.encode(&envelope.message),
                    error = %fault,
                    "Handler failed"
                );
                let err = DispatchError::HandlerFault {
                    type_tag: envelope.type_tag.clone(),
                    fault,
                };
                Err(self
                    .reject(acker, meta, self.config.requeue_on_failure, err)
                    .await)
            }
        }
    }

    /// Known tag whose payload does not decode: record `failed` and nack.
    async fn record_decode_failure<A>(
        &self,
        acker: &A,
        envelope: &Envelope,
        meta: &DeliveryMeta,
        error: shared_types::DecodeError,
    ) -> Result<(), DispatchError>
    where
        A: Acknowledger + ?Sized,
    {
        error!(
            exchange = %meta.exchange,
            queue = %meta.queue,
            type_tag = %envelope.type_tag,
            payload = %BASE64.encode(&envelope.message),
            error = %error,
            "Failed to decode message"
        );

        let key = MessageKey::derive(meta, None, envelope);
        let lock = self.acquire(acker, &key, envelope, meta).await?;
        let new = NewConsumedMessage::from_delivery(key, envelope, meta, None);
        let reason = error.to_string();
        let outcome = self
            .record(new, |record| {
                if !record.is_consumed() {
                    record.mark_failed(reason);
                }
            })
            .await;
        drop(lock);

        if let Err(e) = outcome {
            return Err(self.reject(acker, meta, true, e.into()).await);
        }
        Err(self
            .reject(acker, meta, self.config.requeue_on_failure, error.into())
            .await)
    }

    /// Take the per-key lock; on timeout nack with requeue and leave the
    /// record alone.
    async fn acquire<A>(
        &self,
        acker: &A,
        key: &MessageKey,
        envelope: &Envelope,
        meta: &DeliveryMeta,
    ) -> Result<LedgerLock, DispatchError>
    where
        A: Acknowledger + ?Sized,
    {
        match self.ledger.lock(key, self.config.lock_timeout).await {
            Ok(lock) => Ok(lock),
            Err(e) => {
                warn!(
                    queue = %meta.queue,
                    type_tag = %envelope.type_tag,
                    message_key = %key,
                    error = %e,
                    "Could not lock message, requeueing"
                );
                Err(self.reject(acker, meta, true, e.into()).await)
            }
        }
    }

    /// Find-or-create, apply `update`, persist. Caller holds the lock.
    async fn record<F>(&self, new: NewConsumedMessage, update: F) -> Result<(), LedgerError>
    where
        F: FnOnce(&mut ConsumedMessage) + Send,
    {
        let mut record = self.ledger.find_or_create(new).await?;
        update(&mut record);
        self.ledger.persist(&record).await
    }

    /// Nack the delivery and hand back the error that caused it.
    async fn reject<A>(
        &self,
        acker: &A,
        meta: &DeliveryMeta,
        requeue: bool,
        cause: DispatchError,
    ) -> DispatchError
    where
        A: Acknowledger + ?Sized,
    {
        if let Err(e) = acker.nack(meta.delivery_tag, requeue).await {
            warn!(
                queue = %meta.queue,
                delivery_tag = meta.delivery_tag,
                error = %e,
                "Failed to nack delivery"
            );
        }
        cause
    }
}

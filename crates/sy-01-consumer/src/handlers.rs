//! Handler invocation.
//!
//! Bridges the typed [`MessageHandler`] seen by applications and the
//! type-erased [`ErasedHandler`] stored in the registry.

use crate::domain::HandlerFault;
use crate::ports::{ErasedHandler, MessageHandler};
use async_trait::async_trait;
use shared_types::{DecodedMessage, Message};
use std::marker::PhantomData;

/// A `MessageHandler<M>` behind the erased interface.
pub struct TypedHandler<M, H> {
    handler: H,
    _message: PhantomData<fn() -> M>,
}

impl<M, H> TypedHandler<M, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _message: PhantomData,
        }
    }
}

#[async_trait]
impl<M, H> ErasedHandler for TypedHandler<M, H>
where
    M: Message,
    H: MessageHandler<M>,
{
    async fn invoke(&self, message: DecodedMessage) -> Result<(), HandlerFault> {
        match message.downcast::<M>() {
            Ok(message) => self.handler.handle(*message).await,
            Err(other) => Err(HandlerFault::new(format!(
                "handler for {} received {}",
                M::TYPE,
                other.type_tag()
            ))),
        }
    }
}

//! Inbound (driving) port: application handlers.

use crate::domain::HandlerFault;
use async_trait::async_trait;
use shared_types::{DecodedMessage, Message};

/// Handles one message type.
///
/// Runs while the per-message ledger lock is held: at most one invocation
/// per message key is in flight, across every worker. Invocations for
/// different keys run concurrently.
#[async_trait]
pub trait MessageHandler<M: Message>: Send + Sync {
    /// Returning `Err` records the message as failed and nacks the delivery.
    async fn handle(&self, message: M) -> Result<(), HandlerFault>;
}

/// Untyped handler, registered with [`Consumer::register_raw`](crate::Consumer::register_raw).
///
/// Typed handlers are wrapped into one of these at registration.
#[async_trait]
pub trait ErasedHandler: Send + Sync {
    async fn invoke(&self, message: DecodedMessage) -> Result<(), HandlerFault>;
}

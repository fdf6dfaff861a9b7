//! Inbound (driving) port: request responders.

use async_trait::async_trait;
use shared_types::{ErrorMessage, Message};

/// Answers one request type.
///
/// `Err` is a domain error and is sent back to the caller as-is.
#[async_trait]
pub trait Responder<M: Message>: Send + Sync {
    type Reply: Message;

    async fn respond(&self, request: M) -> Result<Self::Reply, ErrorMessage>;
}

//! Outbound (driven) port: error adaptation.

use crate::domain::RpcFault;
use shared_types::{CorrelationId, DecodedMessage, ErasedMessage};

/// What the client knew about a call when it failed.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    /// The outgoing message, reply address already stamped.
    pub request: &'a dyn ErasedMessage,
    pub correlation_id: CorrelationId,
    pub exchange: &'a str,
    pub routing_key: &'a str,
    /// Raw bytes involved in the fault (the reply payload), when there are any.
    pub payload: Option<&'a [u8]>,
}

/// Turns a raw fault into a domain-shaped error message.
///
/// Gives callers one error shape regardless of what failed.
pub trait ErrorAdapter: Send + Sync {
    fn adapt(&self, fault: &RpcFault, context: &RequestContext<'_>) -> DecodedMessage;
}

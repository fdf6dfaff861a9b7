//! Default error adapter: every fault becomes an [`ErrorMessage`].

use crate::domain::RpcFault;
use crate::ports::{ErrorAdapter, RequestContext};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;
use shared_types::{DecodedMessage, ErrorMessage};

/// Produces an `ErrorMessage` carrying the fault code, the call's
/// correlation id and the request for context.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorAdapter;

impl ErrorAdapter for DefaultErrorAdapter {
    fn adapt(&self, fault: &RpcFault, context: &RequestContext<'_>) -> DecodedMessage {
        let mut error = ErrorMessage::single(fault.code(), fault.to_string())
            .with_correlation_id(Some(context.correlation_id))
            .with_context(json!({
                "request_type": context.request.type_tag(),
                "request": context.request.to_json(),
                "exchange": context.exchange,
                "routing_key": context.routing_key,
                "payload": context.payload.map(|p| BASE64.encode(p)),
            }));
        if let Some(detail) = error.errors.first_mut() {
            detail.source = Some("rpc_client".to_string());
        }
        Box::new(error)
    }
}

//! The terminal value of an RPC call.

use shared_types::{DecodedMessage, ErrorMessage, Message};

/// Decoded reply (or adapted error) plus whether the call succeeded.
#[derive(Debug)]
pub struct RpcResponse {
    pub message: DecodedMessage,
    pub success: bool,
}

impl RpcResponse {
    pub fn success(message: DecodedMessage) -> Self {
        Self {
            message,
            success: true,
        }
    }

    pub fn failure(message: DecodedMessage) -> Self {
        Self {
            message,
            success: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Tag of the carried message.
    pub fn type_tag(&self) -> &str {
        self.message.type_tag()
    }

    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.message.downcast_ref::<M>()
    }

    /// Take the carried message as `M`, or get the response back.
    pub fn into_message<M: Message>(self) -> Result<M, Self> {
        let success = self.success;
        match self.message.downcast::<M>() {
            Ok(message) => Ok(*message),
            Err(message) => Err(Self { message, success }),
        }
    }

    /// The carried message, if it is an [`ErrorMessage`].
    pub fn error_message(&self) -> Option<&ErrorMessage> {
        self.downcast_ref::<ErrorMessage>()
    }
}

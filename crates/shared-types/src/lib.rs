//! # Shared Types Crate
//!
//! Everything both messaging roles (consumer and RPC client) agree on:
//!
//! - the `Envelope` wire frame and its codec,
//! - the `Message` model and its type-erased form,
//! - the per-role `TypeRegistry`,
//! - `CorrelationId` and the config helpers.
//!
//! ## Design Principles
//!
//! - **Framing only**: the envelope never interprets its inner payload.
//! - **Explicit registries**: each consumer/client owns its registry; there
//!   is no global table.
//! - **Lookup is data**: unknown tags come back as `Lookup::Unmatched`.

pub mod config;
pub mod correlation;
pub mod envelope;
pub mod errors;
pub mod message;
pub mod registry;

pub use correlation::CorrelationId;
pub use envelope::{encode, Envelope};
pub use errors::*;
pub use message::{
    decoder_for, DecodedMessage, Decoder, ErasedMessage, ErrorDetail, ErrorMessage,
    GenericMessage, Message,
};
pub use registry::{Lookup, RegisteredType, TypeRegistry};

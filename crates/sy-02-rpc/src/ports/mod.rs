//! Ports layer for the RPC subsystem.
//!
//! - Inbound (driving): `Responder`, implemented by request handlers
//! - Outbound (driven): `ErrorAdapter`

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;

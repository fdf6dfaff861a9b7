//! Ports layer for the Consumer subsystem.
//!
//! - Inbound (driving): `MessageHandler`, implemented by applications
//! - Outbound (driven): `ConsumptionLedger`, `TimeSource`

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;

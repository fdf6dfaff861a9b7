//! # Domain Layer - Consumer Subsystem
//!
//! - `entities`: `ConsumedMessage` records, `ConsumptionStatus`, `MessageKey`
//! - `errors`: `DispatchError`, `LedgerError`, `HandlerFault`
//! - `config`: `ConsumerConfig`

pub mod config;
pub mod entities;
pub mod errors;

pub use config::*;
pub use entities::*;
pub use errors::*;

//! Adapters for the Consumer subsystem.

pub mod memory_ledger;

pub use memory_ledger::InMemoryLedger;

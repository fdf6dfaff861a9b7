//! Adapters for the RPC subsystem.

pub mod error_adapter;

pub use error_adapter::DefaultErrorAdapter;

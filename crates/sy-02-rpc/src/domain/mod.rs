//! # Domain Layer - RPC Subsystem
//!
//! - `config`: `RpcClientConfig`, `RpcServerConfig`
//! - `errors`: `RpcError` (raised), `RpcFault` (adapted)
//! - `response`: `RpcResponse`

pub mod config;
pub mod errors;
pub mod response;

pub use config::*;
pub use errors::*;
pub use response::*;

//! # RPC Subsystem
//!
//! Request/reply on top of the broker's publish/subscribe primitives.
//!
//! ## Purpose
//!
//! A caller publishes a request to a well-known exchange and blocks until a
//! reply with the same correlation id lands on its private reply queue, or
//! until the deadline passes. Responders consume the shared request queue
//! and publish replies through the default exchange.
//!
//! ## Outcome Table
//!
//! | Situation | Result |
//! |-----------|--------|
//! | Broker unreachable, reply queue not declarable | `Err(RpcError::Connection)` |
//! | Reply of a registered type | `Ok`, `success = true` |
//! | `ErrorMessage` reply | `Ok`, `success = false` |
//! | Reply of an unregistered type | `Err(RpcError::UnhandledMessage)` |
//! | Deadline passed | `Ok`, `success = false`, adapted `timeout` |
//! | Publish/transport/decode fault after setup | `Ok`, `success = false`, adapted |
//!
//! Replies whose correlation id belongs to another request are discarded.
//! The reply queue is released on every path.
//!
//! ## Module Structure (Hexagonal Architecture)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  adapters/error_adapter.rs - DefaultErrorAdapter                │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ implements ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ports/inbound.rs  - Responder                                  │
//! │  ports/outbound.rs - ErrorAdapter, RequestContext               │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ uses ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  domain/config.rs   - RpcClientConfig, RpcServerConfig          │
//! │  domain/errors.rs   - RpcError, RpcFault                        │
//! │  domain/response.rs - RpcResponse                               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `client.rs` is the correlation engine, `server.rs` the responder loop.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod client;
pub mod domain;
pub mod ports;
pub mod server;

pub use adapters::*;
pub use client::RpcClient;
pub use domain::*;
pub use ports::*;
pub use server::RpcServer;

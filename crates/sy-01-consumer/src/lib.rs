//! # Consumer Subsystem
//!
//! Turns deliveries into at-most-once-per-key handler invocations.
//!
//! ## Purpose
//!
//! The broker delivers at least once. This crate makes processing
//! idempotent: every delivery is keyed, the key is locked in a shared
//! [`ConsumptionLedger`], and a key whose record already says `success` is
//! acknowledged without running the handler again.
//!
//! ## Dispatch Contract
//!
//! | Situation | Record | Delivery |
//! |-----------|--------|----------|
//! | Malformed envelope | none | nack, no requeue |
//! | Unregistered tag | `unknown_type` | ack |
//! | Payload does not decode | `failed` | nack, requeue per config |
//! | Lock not granted in time | untouched | nack, requeue |
//! | Already `success` | untouched | ack |
//! | Handler ok | `success` | ack |
//! | Handler fault | `failed` | nack, requeue per config |
//!
//! The delivery is settled only after the record is persisted.
//!
//! ## Module Structure (Hexagonal Architecture)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  adapters/memory_ledger.rs - InMemoryLedger (DashMap + Mutex)   │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ implements ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ports/inbound.rs  - MessageHandler, ErasedHandler              │
//! │  ports/outbound.rs - ConsumptionLedger, TimeSource              │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ uses ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  domain/entities.rs - ConsumedMessage, MessageKey               │
//! │  domain/errors.rs   - DispatchError, LedgerError, HandlerFault  │
//! │  domain/config.rs   - ConsumerConfig                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `service.rs` holds the dispatch pipeline, `worker.rs` the worker pool.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod domain;
pub mod handlers;
pub mod ports;
pub mod service;
pub mod worker;

pub use adapters::*;
pub use domain::*;
pub use handlers::TypedHandler;
pub use ports::*;
pub use service::Consumer;
pub use worker::WorkerPool;

//! # Shared Bus - Broker Transport
//!
//! The transport collaborator every Switchyard role talks to.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────┐   publish()    ┌──────────────┐   check_for_message()   ┌──────────────┐
//! │  Publisher   │ ─────────────→ │   Exchange   │ ──────→ Queue ────────→ │   Consumer   │
//! │ / RpcClient  │                │ fanout/direct│                         │ / RpcServer  │
//! └──────────────┘                └──────────────┘                         └──────────────┘
//!        ↑                                                                        │
//!        └────────────── default exchange "" → private reply queue ←──────────────┘
//! ```
//!
//! - [`transport`]: the `Broker` / `Connection` / `Acknowledger` ports.
//! - [`memory`]: `InMemoryBroker`, the reference broker used in tests and
//!   single-process deployments.
//! - [`publisher`]: fire-and-forget publishing of typed messages.
//!
//! Delivery is at-least-once. Consumers are expected to be idempotent.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod errors;
pub mod memory;
pub mod publisher;
pub mod transport;

pub use errors::{PublishError, TransportError};
pub use memory::{InMemoryBroker, InMemoryConnection};
pub use publisher::Publisher;
pub use transport::{
    Acknowledger, Broker, Connection, Delivery, DeliveryMeta, ExchangeKind, PublishProperties,
    QueueOptions, DEFAULT_EXCHANGE,
};

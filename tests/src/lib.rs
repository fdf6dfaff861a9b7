//! # Switchyard Test Suite
//!
//! Cross-crate flows that run the consumer and the RPC engine against one
//! shared `InMemoryBroker`.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/
//! │   └── messaging_benchmarks.rs   # codec, registry, dispatch throughput
//! └── src/
//!     ├── fixtures.rs               # shared message types and handlers
//!     └── integration/
//!         ├── consumer_flows.rs     # publisher → worker pool → ledger
//!         └── rpc_flows.rs          # client ↔ server over reply queues
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p sy-tests
//!
//! # By category
//! cargo test -p sy-tests integration::consumer_flows
//! cargo test -p sy-tests integration::rpc_flows
//!
//! # Benchmarks
//! cargo bench -p sy-tests
//!
//! # With broker and dispatch logs
//! RUST_LOG=debug cargo test -p sy-tests -- --nocapture
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod integration;

use tracing_subscriber::EnvFilter;

/// Install a test subscriber once. Honors `RUST_LOG`, defaults to `warn`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // Another test may have installed it already
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

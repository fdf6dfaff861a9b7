//! # Integration Flows
//!
//! | Flow | Crates |
//! |------|--------|
//! | Publisher → worker pool → ledger | shared-bus, sy-01-consumer |
//! | RpcClient ↔ RpcServer | shared-bus, sy-02-rpc |
//! | RPC server and consumer on one broker | all |

pub mod consumer_flows;
pub mod rpc_flows;

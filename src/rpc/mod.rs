//! Ledger RPC access
//!
//! Prioritized endpoint pool with failure tracking, RPC error classification
//! and the `LedgerClient` seam used by submission and confirmation.

pub mod rpc_atomics;
pub mod rpc_client;
pub mod rpc_config;
pub mod rpc_errors;
pub mod rpc_pool;

pub use rpc_client::{LedgerClient, SendOptions, SignatureStatus, SolanaLedgerClient};
pub use rpc_config::{RpcConfig, RpcEndpointConfig};
pub use rpc_errors::RpcError;
pub use rpc_pool::{EndpointPool, RpcEndpoint};

//! Launchpad transaction pipeline
//!
//! Client-side pipeline that takes a server-prepared, unsigned Solana
//! transaction through wallet signing, resilient multi-endpoint submission and
//! confirmation polling, plus the atomic multi-transaction path that builds,
//! tips and lands a bundle through the block-engine relay.

pub mod bundle;
pub mod compat;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod observability;
pub mod preparer;
pub mod retry;
pub mod rpc;
pub mod submit;
pub mod tx_builder;
pub mod types;
pub mod wallet;

pub use bundle::{BundleRelayClient, BundleStatus, BundleStatusPoller, LaunchPipeline, LaunchReceipt};
pub use config::PipelineConfig;
pub use errors::{PipelineError, PreparationError};
pub use preparer::PreparerClient;
pub use rpc::{EndpointPool, LedgerClient, SolanaLedgerClient};
pub use submit::{ConfirmationWaiter, TransactionPipeline, TransactionSubmitter};
pub use tx_builder::{AtomicBundleBuilder, InstructionSequence};
pub use types::{
    Commitment, ConfirmationResult, Deadline, NetworkId, SignedTransaction,
    UnsignedTransactionEnvelope,
};
pub use wallet::{KeypairWallet, WalletCapability, WalletHandle, WalletSigner};

// Re-export commonly used types
pub use solana_sdk::{message::VersionedMessage, pubkey::Pubkey, signature::Signature};

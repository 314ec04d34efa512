//! Error types for atomic transaction assembly
//!
//! Apart from fetching the blockhash, every failure here happens before
//! anything touches the network and is not retryable: the caller has to fix
//! its inputs.

use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    /// No instruction sequences were added
    #[error("Bundle has no instruction sequences")]
    EmptyBundle,

    /// More transactions than a relay bundle accepts
    #[error("Bundle would contain {count} transactions (max 5)")]
    TooManyTransactions { count: usize },

    /// A transaction ended up with no instructions besides compute budget
    #[error("Transaction {index} has no instructions")]
    EmptyTransaction { index: usize },

    /// Sequences declare compute budgets that cannot be reconciled
    ///
    /// This includes:
    /// - A requested unit limit above the per-transaction cap
    /// - Conflicting compute budget instructions inside one sequence
    #[error("Compute budget merge conflict: {0}")]
    MergeConflict(String),

    /// A compute budget instruction that cannot be decoded
    #[error("Invalid compute budget instruction in sequence '{sequence}': {reason}")]
    InvalidComputeBudget { sequence: String, reason: String },

    /// Message compilation failed
    #[error("Failed to compile message: {0}")]
    Compile(String),

    /// Serialized transaction exceeds the packet size
    #[error("Transaction too large: {size} bytes (max 1232)")]
    TransactionTooLarge { size: usize },

    /// An account is marked signer but nobody can sign for it
    #[error("Signer {signer} has no co-signing keypair")]
    MissingCoSigner { signer: Pubkey },

    /// A co-signer keypair that no instruction requires
    #[error("Co-signer {signer} is not a required signer of its transaction")]
    UnexpectedCoSigner { signer: Pubkey },

    /// Local co-signing failed
    #[error("Co-signing failed: {0}")]
    Signing(String),

    /// No endpoint returned a recent blockhash
    #[error("Blockhash error: {0}")]
    Blockhash(String),

    /// Tip placement or instruction ordering is wrong
    #[error("Invalid instruction order: {0}")]
    InvalidInstructionOrder(String),
}

impl BuildError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Blockhash(_))
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::EmptyBundle | Self::TooManyTransactions { .. } | Self::EmptyTransaction { .. } => {
                "shape"
            }
            Self::MergeConflict(_) | Self::InvalidComputeBudget { .. } => "compute_budget",
            Self::Compile(_) | Self::TransactionTooLarge { .. } => "compile",
            Self::MissingCoSigner { .. } | Self::UnexpectedCoSigner { .. } | Self::Signing(_) => {
                "signing"
            }
            Self::Blockhash(_) => "blockhash",
            Self::InvalidInstructionOrder(_) => "validation",
        }
    }
}

impl BuildError {
    pub fn merge_conflict(reason: impl Into<String>) -> Self {
        Self::MergeConflict(reason.into())
    }

    pub fn invalid_order(reason: impl Into<String>) -> Self {
        Self::InvalidInstructionOrder(reason.into())
    }
}

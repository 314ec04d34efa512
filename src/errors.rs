//! Top-level error taxonomy for the pipeline
//!
//! Each stage owns a `thiserror` enum; `PipelineError` is what a caller of a
//! whole flow sees. The split that matters to callers:
//! - fatal: preparation, signing, permanent submission, build and bundle validation
//! - exhausted: transient failures retried until the bound was reached
//! - ambiguous: confirmation or bundle timeouts and sends whose response was
//!   lost, where the outcome is unknown
//! - terminal: the ledger or relay reported a definite failure

use crate::bundle::BundleError;
use crate::config::ConfigError;
use crate::submit::{ConfirmationError, SubmissionError};
use crate::tx_builder::BuildError;
use crate::wallet::SigningError;
use solana_sdk::signature::Signature;
use thiserror::Error;

/// Failure to obtain or decode a prepared transaction
#[derive(Debug, Clone, Error)]
pub enum PreparationError {
    #[error("Preparer rejected request (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Preparer unreachable: {0}")]
    Transport(String),

    #[error("Failed to decode prepared transaction: {0}")]
    Decode(String),

    #[error("Instruction count mismatch (expected {expected}, got {actual})")]
    InstructionCountMismatch { expected: usize, actual: usize },

    #[error("Network mismatch (expected {expected}, prepared for {actual})")]
    NetworkMismatch { expected: String, actual: String },
}

/// Errors surfaced by the single-transaction and launch flows
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Preparation(#[from] PreparationError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Confirmation(#[from] ConfirmationError),

    /// The wallet was asked to sign and send but never answered; it may have
    /// broadcast the transaction
    #[error("Wallet {wallet} did not answer sign-and-send within {waited_ms}ms; transaction may have been sent")]
    WalletSendUnresolved { wallet: String, waited_ms: u64 },

    /// The ledger reported an execution error for the transaction
    #[error("Transaction {signature} failed in slot {slot:?}: {reason}")]
    TransactionFailed {
        signature: Signature,
        slot: Option<u64>,
        reason: String,
    },

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error("Bundle {bundle_id} rejected by relay as invalid")]
    BundleInvalid { bundle_id: String },

    #[error("Bundle {bundle_id} failed (slot {slot:?})")]
    BundleFailed { bundle_id: String, slot: Option<u64> },

    /// Neither the relay nor the ledger could say whether the bundle landed
    #[error("Bundle {bundle_id} outcome unknown after timeout ({} transactions)", signatures.len())]
    BundleTimeout {
        bundle_id: String,
        signatures: Vec<Signature>,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PipelineError {
    /// Whether the outcome is unknown and must be reconciled rather than retried
    pub fn is_ambiguous(&self) -> bool {
        match self {
            PipelineError::Confirmation(err) => err.is_ambiguous(),
            PipelineError::Submission(err) => err.is_ambiguous(),
            PipelineError::WalletSendUnresolved { .. } | PipelineError::BundleTimeout { .. } => true,
            _ => false,
        }
    }

    /// Whether restarting the whole flow (including signing) may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Preparation(err) => matches!(err, PreparationError::Transport(_)),
            PipelineError::Signing(err) => err.is_retryable(),
            PipelineError::Submission(err) => err.is_retryable(),
            PipelineError::Confirmation(err) => err.is_retryable(),
            PipelineError::Bundle(err) => err.is_retryable(),
            PipelineError::Build(err) => err.is_retryable(),
            PipelineError::TransactionFailed { .. }
            | PipelineError::WalletSendUnresolved { .. }
            | PipelineError::BundleInvalid { .. }
            | PipelineError::BundleFailed { .. }
            | PipelineError::BundleTimeout { .. }
            | PipelineError::Config(_) => false,
        }
    }

    /// Short label for logs and metrics
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::Preparation(_) => "preparation",
            PipelineError::Signing(_) => "signing",
            PipelineError::Submission(_) => "submission",
            PipelineError::Confirmation(_) => "confirmation",
            PipelineError::WalletSendUnresolved { .. } => "wallet_send_unresolved",
            PipelineError::TransactionFailed { .. } => "transaction_failed",
            PipelineError::Build(_) => "build",
            PipelineError::Bundle(_) => "bundle",
            PipelineError::BundleInvalid { .. } => "bundle_invalid",
            PipelineError::BundleFailed { .. } => "bundle_failed",
            PipelineError::BundleTimeout { .. } => "bundle_timeout",
            PipelineError::Config(_) => "config",
        }
    }
}

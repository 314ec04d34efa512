use crate::rpc::RpcError;
use crate::types::Commitment;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use thiserror::Error;

/// Failure to get signed bytes accepted by any endpoint
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubmissionError {
    #[error("No RPC endpoints configured")]
    NoEndpoints,

    #[error("Transaction is not fully signed (missing: {missing:?})")]
    NotFullySigned { missing: Vec<Pubkey> },

    /// Rejected for a reason resending cannot fix
    #[error("Transaction rejected by {endpoint}: {source}")]
    Permanent {
        endpoint: String,
        #[source]
        source: RpcError,
    },

    /// Every attempt failed with a transient error
    #[error("Submission exhausted after {attempts} attempts (last endpoint {last_endpoint}): {last_error}")]
    Exhausted {
        attempts: u32,
        last_endpoint: String,
        last_error: RpcError,
    },

    #[error("Submission deadline reached after {attempts} attempts")]
    DeadlineExceeded {
        attempts: u32,
        last_error: Option<RpcError>,
    },

    /// Retries ran out after a send whose error leaves open whether a node
    /// received the bytes; the transaction may still land
    #[error("Submission of {signature} unresolved after {attempts} attempts: {cause}")]
    Unresolved {
        signature: Signature,
        attempts: u32,
        cause: RpcError,
    },

    /// The endpoint acknowledged a different transaction
    #[error("Endpoint {endpoint} returned signature {returned}, expected {expected}")]
    SignatureMismatch {
        endpoint: String,
        expected: Signature,
        returned: Signature,
    },
}

impl SubmissionError {
    /// Whether restarting the flow may succeed. Only true when no send could
    /// have reached a node.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SubmissionError::Exhausted { .. } | SubmissionError::DeadlineExceeded { .. }
        )
    }

    /// Whether the transaction may have been accepted despite the error
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, SubmissionError::Unresolved { .. })
    }

    pub fn category(&self) -> &'static str {
        match self {
            SubmissionError::NoEndpoints => "no_endpoints",
            SubmissionError::NotFullySigned { .. } => "not_fully_signed",
            SubmissionError::Permanent { .. } => "permanent",
            SubmissionError::Exhausted { .. } => "exhausted",
            SubmissionError::DeadlineExceeded { .. } => "deadline",
            SubmissionError::Unresolved { .. } => "unresolved",
            SubmissionError::SignatureMismatch { .. } => "signature_mismatch",
        }
    }

    pub fn last_endpoint(&self) -> Option<&str> {
        match self {
            SubmissionError::Permanent { endpoint, .. }
            | SubmissionError::SignatureMismatch { endpoint, .. } => Some(endpoint),
            SubmissionError::Exhausted { last_endpoint, .. } => Some(last_endpoint),
            SubmissionError::Unresolved { cause, .. } => Some(cause.endpoint()),
            SubmissionError::DeadlineExceeded { last_error, .. } => {
                last_error.as_ref().map(RpcError::endpoint)
            }
            SubmissionError::NoEndpoints | SubmissionError::NotFullySigned { .. } => None,
        }
    }
}

/// Confirmation ended without a conclusive ledger answer, or with proof the
/// transaction can no longer land
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfirmationError {
    /// Outcome unknown; the transaction may still land
    #[error("Confirmation of {signature} timed out after {waited_ms}ms (last seen: {last_seen:?})")]
    Timeout {
        signature: Signature,
        waited_ms: u64,
        last_seen: Option<Commitment>,
    },

    /// The chain passed the blockhash's last valid height without the signature
    #[error("Blockhash of {signature} expired: block height {block_height} > {last_valid_block_height}")]
    BlockhashExpired {
        signature: Signature,
        last_valid_block_height: u64,
        block_height: u64,
    },

    #[error("No RPC endpoints configured")]
    NoEndpoints,
}

impl ConfirmationError {
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, ConfirmationError::Timeout { .. })
    }

    /// Expired transactions can be prepared and signed again safely
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConfirmationError::BlockhashExpired { .. })
    }

    pub fn category(&self) -> &'static str {
        match self {
            ConfirmationError::Timeout { .. } => "confirmation_timeout",
            ConfirmationError::BlockhashExpired { .. } => "blockhash_expired",
            ConfirmationError::NoEndpoints => "no_endpoints",
        }
    }
}

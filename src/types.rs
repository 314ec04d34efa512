//! Common types used throughout the pipeline

use crate::compat;
use crate::errors::PreparationError;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use solana_sdk::{
    commitment_config::{CommitmentConfig, CommitmentLevel},
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Ledger network a transaction is prepared for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkId {
    MainnetBeta,
    Devnet,
    Testnet,
    Localnet,
}

impl NetworkId {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkId::MainnetBeta => "mainnet-beta",
            NetworkId::Devnet => "devnet",
            NetworkId::Testnet => "testnet",
            NetworkId::Localnet => "localnet",
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finality threshold, ordered from weakest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }

    pub fn level(&self) -> CommitmentLevel {
        match self {
            Commitment::Processed => CommitmentLevel::Processed,
            Commitment::Confirmed => CommitmentLevel::Confirmed,
            Commitment::Finalized => CommitmentLevel::Finalized,
        }
    }

    pub fn config(&self) -> CommitmentConfig {
        CommitmentConfig {
            commitment: self.level(),
        }
    }

    /// Whether a status observed at `self` satisfies a caller waiting for `target`
    pub fn satisfies(&self, target: Commitment) -> bool {
        *self >= target
    }
}

impl Default for Commitment {
    fn default() -> Self {
        Commitment::Confirmed
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stand-in for "no deadline": roughly thirty years
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Wall-clock budget handed down from the caller to every stage.
///
/// Built on `tokio::time::Instant` so paused-clock tests drive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn at(at: Instant) -> Self {
        Self { at }
    }

    /// Saturates to a far-future instant for budgets the clock cannot represent
    pub fn after(budget: Duration) -> Self {
        let now = Instant::now();
        Self {
            at: now
                .checked_add(budget)
                .unwrap_or_else(|| now + FAR_FUTURE),
        }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// The earlier of the two deadlines
    pub fn min(self, other: Deadline) -> Deadline {
        if other.at < self.at {
            other
        } else {
            self
        }
    }

    /// Clamp a sleep so it never overshoots the deadline
    pub fn clamp(&self, wait: Duration) -> Duration {
        wait.min(self.remaining())
    }
}

/// Metadata the preparer attaches to a serialized transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    /// Network the transaction was built for
    pub network: NetworkId,

    /// Number of instructions the preparer put in the message
    #[serde(default)]
    pub expected_instruction_count: Option<usize>,

    /// Last block height at which the embedded blockhash is still valid
    #[serde(default)]
    pub last_valid_block_height: Option<u64>,

    /// Anything else the preparer sends along; carried but not interpreted
    #[serde(default, flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl EnvelopeMetadata {
    pub fn new(network: NetworkId) -> Self {
        Self {
            network,
            expected_instruction_count: None,
            last_valid_block_height: None,
            extra: HashMap::new(),
        }
    }
}

/// Unsigned transaction produced by the preparer.
///
/// The payload is opaque until it is consumed; `into_transaction` takes the
/// envelope by value so it can only be decoded once per submission attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsignedTransactionEnvelope {
    bytes: Vec<u8>,
    metadata: EnvelopeMetadata,
}

impl UnsignedTransactionEnvelope {
    pub fn new(bytes: Vec<u8>, metadata: EnvelopeMetadata) -> Self {
        Self { bytes, metadata }
    }

    pub fn from_base64(encoded: &str, metadata: EnvelopeMetadata) -> Result<Self, PreparationError> {
        let bytes = BASE64_STANDARD
            .decode(encoded.trim())
            .map_err(|e| PreparationError::Decode(format!("invalid base64 payload: {}", e)))?;
        Ok(Self::new(bytes, metadata))
    }

    pub fn metadata(&self) -> &EnvelopeMetadata {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode the payload into a transaction, consuming the envelope
    pub fn into_transaction(self) -> Result<VersionedTransaction, PreparationError> {
        if self.bytes.is_empty() {
            return Err(PreparationError::Decode("empty transaction payload".to_string()));
        }

        let tx: VersionedTransaction = bincode::deserialize(&self.bytes)
            .map_err(|e| PreparationError::Decode(format!("malformed transaction: {}", e)))?;

        let actual = compat::get_instructions(&tx.message).len();
        if let Some(expected) = self.metadata.expected_instruction_count {
            if expected != actual {
                return Err(PreparationError::InstructionCountMismatch { expected, actual });
            }
        }

        let signers = compat::get_required_signers(&tx.message).len();
        if tx.signatures.len() != signers {
            return Err(PreparationError::Decode(format!(
                "signature slots ({}) do not match required signers ({})",
                tx.signatures.len(),
                signers
            )));
        }

        Ok(tx)
    }
}

/// Transaction after signing.
///
/// May still carry empty signature slots on the bundle path until every
/// co-signer and the wallet have signed.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    tx: VersionedTransaction,
}

impl SignedTransaction {
    pub fn new(tx: VersionedTransaction) -> Self {
        Self { tx }
    }

    pub fn transaction(&self) -> &VersionedTransaction {
        &self.tx
    }

    pub fn into_inner(self) -> VersionedTransaction {
        self.tx
    }

    /// Content-addressed identifier: the fee payer's signature
    pub fn signature(&self) -> Signature {
        self.tx.signatures.first().copied().unwrap_or_default()
    }

    pub fn fee_payer(&self) -> Option<Pubkey> {
        compat::get_required_signers(&self.tx.message).first().copied()
    }

    pub fn present_signature_count(&self) -> usize {
        compat::present_signature_count(&self.tx)
    }

    pub fn missing_signers(&self) -> Vec<Pubkey> {
        compat::missing_signers(&self.tx)
    }

    pub fn is_fully_signed(&self) -> bool {
        self.missing_signers().is_empty()
    }

    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(&self.tx)
    }

    pub fn to_base64(&self) -> Result<String, bincode::Error> {
        Ok(BASE64_STANDARD.encode(self.serialize()?))
    }
}

/// Outcome of one send against one endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Accepted(Signature),
    Rejected(String),
}

/// One transmission of signed bytes; logged and then dropped
#[derive(Debug, Clone)]
pub struct SubmissionAttempt {
    pub endpoint: String,
    pub skip_preflight: bool,
    pub outcome: AttemptOutcome,
}

impl SubmissionAttempt {
    pub fn log(self, attempt: u32) {
        match &self.outcome {
            AttemptOutcome::Accepted(signature) => tracing::debug!(
                endpoint = %self.endpoint,
                attempt = attempt,
                skip_preflight = self.skip_preflight,
                signature = %signature,
                "Submission accepted"
            ),
            AttemptOutcome::Rejected(reason) => tracing::warn!(
                endpoint = %self.endpoint,
                attempt = attempt,
                skip_preflight = self.skip_preflight,
                reason = %reason,
                "Submission rejected"
            ),
        }
    }
}

/// What the ledger conclusively reported about a signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationResult {
    pub signature: Signature,
    pub landed: bool,
    pub slot: Option<u64>,
    pub error: Option<String>,
}

impl ConfirmationResult {
    pub fn landed(signature: Signature, slot: u64) -> Self {
        Self {
            signature,
            landed: true,
            slot: Some(slot),
            error: None,
        }
    }

    pub fn failed(signature: Signature, slot: u64, error: impl Into<String>) -> Self {
        Self {
            signature,
            landed: false,
            slot: Some(slot),
            error: Some(error.into()),
        }
    }
}

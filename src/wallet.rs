//! Wallet capability, selection and signing
//!
//! Two wallet variants sit behind one trait: externally connected wallets and
//! wallets embedded in the platform. Every wallet exposes a primary signing
//! interface and a documented fallback; `WalletSigner` tries both before a
//! `SigningError` surfaces. Signing is never retried automatically.

use crate::compat;
use crate::errors::PipelineError;
use crate::rpc::LedgerClient;
use crate::submit::TransactionSubmitter;
use crate::types::{Deadline, NetworkId, SignedTransaction};
use anyhow::{Context, Result};
use async_trait::async_trait;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::VersionedTransaction,
};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroize;

/// Raw failure reported by a wallet implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    #[error("user rejected the request")]
    Rejected,

    #[error("wallet unavailable: {0}")]
    Unavailable(String),

    #[error("{0} is not supported by this wallet")]
    Unsupported(&'static str),

    #[error("{0}")]
    Failed(String),
}

/// Signing failures surfaced to the pipeline.
///
/// All of them are fatal for the current flow; the user may restart it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    #[error("No wallet available for signing")]
    NoWalletAvailable,

    #[error("User rejected signing in {wallet}")]
    UserRejected { wallet: String },

    #[error("Wallet {wallet} unavailable: {reason}")]
    WalletUnavailable { wallet: String, reason: String },

    #[error("Wallet {wallet} did not sign within {timeout_ms}ms")]
    SigningTimeout { wallet: String, timeout_ms: u64 },

    #[error("Wallet {wallet} failed to sign (primary: {primary}; fallback: {fallback})")]
    Failed {
        wallet: String,
        primary: String,
        fallback: String,
    },

    #[error("Wallet {wallet} returned a transaction with different content")]
    MessageAltered { wallet: String },

    #[error("Wallet {wallet} did not provide a valid signature for {signer}")]
    MissingSignature { wallet: String, signer: Pubkey },
}

impl SigningError {
    /// Whether a user-initiated restart could succeed without changing anything
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SigningError::WalletUnavailable { .. } | SigningError::SigningTimeout { .. }
        )
    }

    pub fn category(&self) -> &'static str {
        match self {
            SigningError::NoWalletAvailable => "no_wallet",
            SigningError::UserRejected { .. } => "user_rejected",
            SigningError::WalletUnavailable { .. } => "wallet_unavailable",
            SigningError::SigningTimeout { .. } => "signing_timeout",
            SigningError::Failed { .. } => "signing_failed",
            SigningError::MessageAltered { .. } => "message_altered",
            SigningError::MissingSignature { .. } => "missing_signature",
        }
    }
}

/// What any wallet implementation must offer.
///
/// `sign_transaction` is the primary interface and `sign_all_transactions`
/// its fallback. `sign_and_send_transaction` lets a wallet submit on its own.
#[async_trait]
pub trait WalletCapability: Send + Sync + fmt::Debug {
    fn address(&self) -> Pubkey;

    fn name(&self) -> &str;

    /// Embedded wallets flagged as the platform's own are eligible for selection
    fn is_platform_wallet(&self) -> bool {
        false
    }

    async fn sign_transaction(
        &self,
        tx: VersionedTransaction,
    ) -> std::result::Result<VersionedTransaction, WalletError>;

    async fn sign_all_transactions(
        &self,
        _txs: Vec<VersionedTransaction>,
    ) -> std::result::Result<Vec<VersionedTransaction>, WalletError> {
        Err(WalletError::Unsupported("signAllTransactions"))
    }

    async fn sign_and_send_transaction(
        &self,
        _tx: VersionedTransaction,
        _network: NetworkId,
    ) -> std::result::Result<Signature, WalletError> {
        Err(WalletError::Unsupported("signAndSendTransaction"))
    }
}

/// A wallet chosen for one flow
#[derive(Debug, Clone)]
pub enum WalletHandle {
    External(Arc<dyn WalletCapability>),
    Embedded(Arc<dyn WalletCapability>),
}

impl WalletHandle {
    /// First external wallet, else the embedded platform wallet
    pub fn select(
        external: &[Arc<dyn WalletCapability>],
        embedded: &[Arc<dyn WalletCapability>],
    ) -> std::result::Result<Self, SigningError> {
        if let Some(wallet) = external.first() {
            return Ok(WalletHandle::External(wallet.clone()));
        }
        embedded
            .iter()
            .find(|wallet| wallet.is_platform_wallet())
            .map(|wallet| WalletHandle::Embedded(wallet.clone()))
            .ok_or(SigningError::NoWalletAvailable)
    }

    pub fn capability(&self) -> &Arc<dyn WalletCapability> {
        match self {
            WalletHandle::External(wallet) | WalletHandle::Embedded(wallet) => wallet,
        }
    }

    pub fn address(&self) -> Pubkey {
        self.capability().address()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WalletHandle::External(_) => "external",
            WalletHandle::Embedded(_) => "embedded",
        }
    }
}

/// Uniform sign / sign-and-submit over any `WalletHandle`
#[derive(Debug, Clone)]
pub struct WalletSigner {
    timeout: Duration,
}

impl WalletSigner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn budget(&self, deadline: Deadline) -> Duration {
        deadline.clamp(self.timeout)
    }

    fn timed_out(&self, wallet: &str, budget: Duration) -> SigningError {
        SigningError::SigningTimeout {
            wallet: wallet.to_string(),
            timeout_ms: budget.as_millis() as u64,
        }
    }

    /// Sign one transaction: primary interface, then fallback
    #[instrument(skip(self, handle, tx, deadline), fields(wallet = %handle.capability().name(), kind = handle.kind()))]
    pub async fn sign(
        &self,
        handle: &WalletHandle,
        tx: VersionedTransaction,
        deadline: Deadline,
    ) -> std::result::Result<SignedTransaction, SigningError> {
        let wallet = handle.capability();
        let name = wallet.name().to_string();

        let budget = self.budget(deadline);
        let primary = match tokio::time::timeout(budget, wallet.sign_transaction(tx.clone())).await {
            Err(_) => return Err(self.timed_out(&name, budget)),
            Ok(Ok(signed)) => return verify_signed(wallet.as_ref(), &tx, signed),
            Ok(Err(WalletError::Rejected)) => return Err(SigningError::UserRejected { wallet: name }),
            Ok(Err(err)) => err,
        };

        debug!(error = %primary, "Primary signing interface failed, trying fallback");

        let budget = self.budget(deadline);
        let fallback =
            match tokio::time::timeout(budget, wallet.sign_all_transactions(vec![tx.clone()])).await {
                Err(_) => return Err(self.timed_out(&name, budget)),
                Ok(Ok(mut signed)) => match (signed.pop(), signed.is_empty()) {
                    (Some(one), true) => return verify_signed(wallet.as_ref(), &tx, one),
                    _ => WalletError::Failed("fallback returned an unexpected number of transactions".to_string()),
                },
                Ok(Err(WalletError::Rejected)) => {
                    return Err(SigningError::UserRejected { wallet: name })
                }
                Ok(Err(err)) => err,
            };

        Err(both_failed(name, primary, fallback))
    }

    /// Sign several transactions at once: batch interface first, then one by one
    #[instrument(skip(self, handle, txs, deadline), fields(wallet = %handle.capability().name(), count = txs.len()))]
    pub async fn sign_many(
        &self,
        handle: &WalletHandle,
        txs: Vec<VersionedTransaction>,
        deadline: Deadline,
    ) -> std::result::Result<Vec<SignedTransaction>, SigningError> {
        let wallet = handle.capability();
        let name = wallet.name().to_string();

        let budget = self.budget(deadline);
        let primary = match tokio::time::timeout(budget, wallet.sign_all_transactions(txs.clone())).await {
            Err(_) => return Err(self.timed_out(&name, budget)),
            Ok(Ok(signed)) if signed.len() == txs.len() => {
                return txs
                    .iter()
                    .zip(signed)
                    .map(|(original, signed)| verify_signed(wallet.as_ref(), original, signed))
                    .collect();
            }
            Ok(Ok(signed)) => WalletError::Failed(format!(
                "expected {} signed transactions, got {}",
                txs.len(),
                signed.len()
            )),
            Ok(Err(WalletError::Rejected)) => return Err(SigningError::UserRejected { wallet: name }),
            Ok(Err(err)) => err,
        };

        debug!(error = %primary, "Batch signing failed, signing individually");

        let mut out = Vec::with_capacity(txs.len());
        for tx in txs {
            let budget = self.budget(deadline);
            match tokio::time::timeout(budget, wallet.sign_transaction(tx.clone())).await {
                Err(_) => return Err(self.timed_out(&name, budget)),
                Ok(Ok(signed)) => out.push(verify_signed(wallet.as_ref(), &tx, signed)?),
                Ok(Err(WalletError::Rejected)) => {
                    return Err(SigningError::UserRejected { wallet: name })
                }
                Ok(Err(fallback)) => return Err(both_failed(name, primary, fallback)),
            }
        }
        Ok(out)
    }

    /// Let the wallet sign and submit; fall back to signing here and
    /// submitting through `submitter`.
    ///
    /// Ed25519 signatures are deterministic, so if the wallet did transmit
    /// before failing, the fallback resubmits identical bytes. A wallet that
    /// never answers may still broadcast, so that case is reported as
    /// `WalletSendUnresolved` and nothing is resubmitted.
    #[instrument(skip(self, handle, tx, network, submitter, deadline), fields(wallet = %handle.capability().name(), network = %network))]
    pub async fn sign_and_submit<C: LedgerClient + ?Sized>(
        &self,
        handle: &WalletHandle,
        tx: VersionedTransaction,
        network: NetworkId,
        submitter: &TransactionSubmitter<C>,
        deadline: Deadline,
    ) -> std::result::Result<Signature, PipelineError> {
        let wallet = handle.capability();
        let name = wallet.name().to_string();

        let budget = self.budget(deadline);
        match tokio::time::timeout(budget, wallet.sign_and_send_transaction(tx.clone(), network)).await {
            Err(_) => {
                warn!(waited_ms = budget.as_millis() as u64, "Wallet sign-and-send did not answer");
                return Err(PipelineError::WalletSendUnresolved {
                    wallet: name,
                    waited_ms: budget.as_millis() as u64,
                });
            }
            Ok(Ok(signature)) => {
                info!(signature = %signature, "Wallet signed and submitted");
                return Ok(signature);
            }
            Ok(Err(WalletError::Rejected)) => {
                return Err(SigningError::UserRejected { wallet: name }.into())
            }
            Ok(Err(err)) => {
                debug!(error = %err, "signAndSendTransaction failed, signing and submitting locally");
            }
        }

        let signed = self.sign(handle, tx, deadline).await?;
        Ok(submitter.submit(&signed, deadline).await?)
    }
}

fn both_failed(wallet: String, primary: WalletError, fallback: WalletError) -> SigningError {
    match (&primary, &fallback) {
        (WalletError::Unavailable(reason), WalletError::Unavailable(_))
        | (WalletError::Unavailable(reason), WalletError::Unsupported(_)) => {
            SigningError::WalletUnavailable {
                wallet,
                reason: reason.clone(),
            }
        }
        _ => {
            warn!(wallet = %wallet, primary = %primary, fallback = %fallback, "Both signing interfaces failed");
            SigningError::Failed {
                wallet,
                primary: primary.to_string(),
                fallback: fallback.to_string(),
            }
        }
    }
}

/// Check that the wallet signed exactly what it was given.
///
/// The message must be unchanged, signatures already present (co-signers)
/// must be kept, and the wallet's own slot must hold a valid signature.
fn verify_signed(
    wallet: &dyn WalletCapability,
    original: &VersionedTransaction,
    signed: VersionedTransaction,
) -> std::result::Result<SignedTransaction, SigningError> {
    let name = wallet.name().to_string();

    if signed.message != original.message || signed.signatures.len() != original.signatures.len() {
        return Err(SigningError::MessageAltered { wallet: name });
    }

    let kept_cosignatures = original
        .signatures
        .iter()
        .zip(&signed.signatures)
        .all(|(before, after)| *before == Signature::default() || before == after);
    if !kept_cosignatures {
        return Err(SigningError::MessageAltered { wallet: name });
    }

    let address = wallet.address();
    let message_bytes = signed.message.serialize();
    let valid = compat::signer_position(&signed.message, &address)
        .and_then(|position| signed.signatures.get(position))
        .map_or(false, |sig| sig.verify(address.as_ref(), &message_bytes));
    if !valid {
        return Err(SigningError::MissingSignature {
            wallet: name,
            signer: address,
        });
    }

    Ok(SignedTransaction::new(signed))
}

/// Local keypair-backed wallet
#[derive(Debug)]
pub struct KeypairWallet {
    keypair: Arc<Keypair>,
    name: String,
    platform: bool,
}

impl KeypairWallet {
    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
            name: "keypair".to_string(),
            platform: false,
        }
    }

    /// Load from a keypair file: 64 raw bytes or a JSON byte array
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file_bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read keypair file: {}", path.display()))?;

        let keypair = if file_bytes.len() == 64 {
            keypair_from_bytes(&file_bytes)
        } else {
            match serde_json::from_slice::<Vec<u8>>(&file_bytes) {
                Ok(mut json) => {
                    let keypair = keypair_from_bytes(&json);
                    json.zeroize();
                    keypair
                }
                Err(e) => Err(anyhow::anyhow!("Failed to parse keypair JSON: {}", e)),
            }
        };
        file_bytes.zeroize();

        Ok(Self::from_keypair(keypair?))
    }

    /// Load from a base58-encoded 64-byte secret
    pub fn from_base58(secret: &str) -> Result<Self> {
        let mut bytes = bs58::decode(secret.trim())
            .into_vec()
            .context("Invalid base58 secret")?;
        let keypair = keypair_from_bytes(&bytes);
        bytes.zeroize();
        Ok(Self::from_keypair(keypair?))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Flag this wallet as the platform's own embedded wallet
    pub fn as_platform_wallet(mut self) -> Self {
        self.platform = true;
        self
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn keypair_arc(&self) -> Arc<Keypair> {
        Arc::clone(&self.keypair)
    }

    fn sign_in_place(
        &self,
        mut tx: VersionedTransaction,
    ) -> std::result::Result<VersionedTransaction, WalletError> {
        let position = compat::signer_position(&tx.message, &self.pubkey()).ok_or_else(|| {
            WalletError::Failed(format!("{} is not a required signer", self.pubkey()))
        })?;
        let signature = self.keypair.sign_message(&tx.message.serialize());
        match tx.signatures.get_mut(position) {
            Some(slot) => *slot = signature,
            None => return Err(WalletError::Failed("missing signature slot".to_string())),
        }
        Ok(tx)
    }
}

fn keypair_from_bytes(bytes: &[u8]) -> Result<Keypair> {
    if bytes.len() != 64 {
        anyhow::bail!("Invalid keypair length: expected 64 bytes, got {}", bytes.len());
    }
    if bytes.iter().all(|&b| b == 0) {
        anyhow::bail!("Invalid keypair: all-zero key rejected");
    }
    Keypair::try_from(bytes).context("Invalid keypair bytes")
}

#[async_trait]
impl WalletCapability for KeypairWallet {
    fn address(&self) -> Pubkey {
        self.pubkey()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_platform_wallet(&self) -> bool {
        self.platform
    }

    async fn sign_transaction(
        &self,
        tx: VersionedTransaction,
    ) -> std::result::Result<VersionedTransaction, WalletError> {
        self.sign_in_place(tx)
    }

    async fn sign_all_transactions(
        &self,
        txs: Vec<VersionedTransaction>,
    ) -> std::result::Result<Vec<VersionedTransaction>, WalletError> {
        txs.into_iter().map(|tx| self.sign_in_place(tx)).collect()
    }
}

//! Ledger access seam
//!
//! The submitter and the confirmation waiter only talk to the ledger through
//! [`LedgerClient`], addressed by endpoint URL. The production implementation
//! wraps `solana-client`'s nonblocking `RpcClient`, one per URL.
use super::rpc_errors::RpcError;
use crate::types::Commitment;
use async_trait::async_trait;
use dashmap::DashMap;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_rpc_client_api::config::RpcSendTransactionConfig;
use solana_sdk::{hash::Hash, signature::Signature, transaction::VersionedTransaction};
use solana_transaction_status::{TransactionConfirmationStatus, UiTransactionEncoding};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Options for one `sendTransaction` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    pub skip_preflight: bool,
    pub preflight_commitment: Commitment,
    pub max_retries: Option<usize>,
}

impl SendOptions {
    /// Full preflight simulation
    pub fn strict(preflight_commitment: Commitment, max_retries: Option<usize>) -> Self {
        Self {
            skip_preflight: false,
            preflight_commitment,
            max_retries,
        }
    }

    /// Same transaction, simulation skipped
    pub fn relaxed(self) -> Self {
        Self {
            skip_preflight: true,
            ..self
        }
    }
}

/// Status of a signature as reported by one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureStatus {
    pub slot: u64,
    pub commitment: Commitment,
    /// Execution error, if the transaction landed but failed
    pub error: Option<String>,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn send_transaction(
        &self,
        endpoint: &str,
        tx: &VersionedTransaction,
        options: SendOptions,
    ) -> Result<Signature, RpcError>;

    /// `Ok(None)` when the node has not seen the signature
    async fn get_signature_status(
        &self,
        endpoint: &str,
        signature: &Signature,
    ) -> Result<Option<SignatureStatus>, RpcError>;

    /// Blockhash and the last block height at which it is valid
    async fn get_latest_blockhash(
        &self,
        endpoint: &str,
        commitment: Commitment,
    ) -> Result<(Hash, u64), RpcError>;

    async fn get_block_height(&self, endpoint: &str, commitment: Commitment)
        -> Result<u64, RpcError>;
}

/// `LedgerClient` backed by `solana-client`
pub struct SolanaLedgerClient {
    clients: DashMap<String, Arc<RpcClient>>,
    timeout: Duration,
}

impl std::fmt::Debug for SolanaLedgerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaLedgerClient")
            .field("clients", &self.clients.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SolanaLedgerClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            timeout,
        }
    }

    fn client(&self, endpoint: &str) -> Arc<RpcClient> {
        self.clients
            .entry(endpoint.to_string())
            .or_insert_with(|| {
                Arc::new(RpcClient::new_with_timeout(
                    endpoint.to_string(),
                    self.timeout,
                ))
            })
            .clone()
    }

    fn map_err(&self, endpoint: &str) -> impl Fn(solana_client::client_error::ClientError) -> RpcError + '_ {
        let endpoint = endpoint.to_string();
        move |err| {
            RpcError::classify(&err.to_string(), &endpoint, Some(self.timeout.as_millis() as u64))
        }
    }
}

#[async_trait]
impl LedgerClient for SolanaLedgerClient {
    #[instrument(skip(self, tx), fields(skip_preflight = options.skip_preflight))]
    async fn send_transaction(
        &self,
        endpoint: &str,
        tx: &VersionedTransaction,
        options: SendOptions,
    ) -> Result<Signature, RpcError> {
        let config = RpcSendTransactionConfig {
            skip_preflight: options.skip_preflight,
            preflight_commitment: Some(options.preflight_commitment.level()),
            encoding: Some(UiTransactionEncoding::Base64),
            max_retries: options.max_retries,
            ..Default::default()
        };

        self.client(endpoint)
            .send_transaction_with_config(tx, config)
            .await
            .map_err(self.map_err(endpoint))
    }

    async fn get_signature_status(
        &self,
        endpoint: &str,
        signature: &Signature,
    ) -> Result<Option<SignatureStatus>, RpcError> {
        let response = self
            .client(endpoint)
            .get_signature_statuses(&[*signature])
            .await
            .map_err(self.map_err(endpoint))?;

        let status = match response.value.into_iter().next().flatten() {
            Some(status) => status,
            None => return Ok(None),
        };

        let commitment = match status.confirmation_status {
            Some(TransactionConfirmationStatus::Processed) => Commitment::Processed,
            Some(TransactionConfirmationStatus::Confirmed) => Commitment::Confirmed,
            Some(TransactionConfirmationStatus::Finalized) => Commitment::Finalized,
            // Older nodes: no confirmation count means rooted
            None if status.confirmations.is_none() => Commitment::Finalized,
            None => Commitment::Processed,
        };

        debug!(
            endpoint = %endpoint,
            signature = %signature,
            slot = status.slot,
            commitment = %commitment,
            "Signature status"
        );

        Ok(Some(SignatureStatus {
            slot: status.slot,
            commitment,
            error: status.err.map(|err| err.to_string()),
        }))
    }

    async fn get_latest_blockhash(
        &self,
        endpoint: &str,
        commitment: Commitment,
    ) -> Result<(Hash, u64), RpcError> {
        self.client(endpoint)
            .get_latest_blockhash_with_commitment(commitment.config())
            .await
            .map_err(self.map_err(endpoint))
    }

    async fn get_block_height(
        &self,
        endpoint: &str,
        commitment: Commitment,
    ) -> Result<u64, RpcError> {
        self.client(endpoint)
            .get_block_height_with_commitment(commitment.config())
            .await
            .map_err(self.map_err(endpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_options_phases() {
        let strict = SendOptions::strict(Commitment::Confirmed, Some(0));
        assert!(!strict.skip_preflight);
        let relaxed = strict.relaxed();
        assert!(relaxed.skip_preflight);
        assert_eq!(relaxed.preflight_commitment, Commitment::Confirmed);
        assert_eq!(relaxed.max_retries, Some(0));
    }

    #[test]
    fn test_client_cached_per_endpoint() {
        let ledger = SolanaLedgerClient::new(Duration::from_secs(1));
        let a = ledger.client("http://127.0.0.1:8899");
        let b = ledger.client("http://127.0.0.1:8899");
        let c = ledger.client("http://127.0.0.1:8900");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let ledger = SolanaLedgerClient::new(Duration::from_millis(500));
        let err = ledger
            .get_block_height("http://127.0.0.1:1", Commitment::Confirmed)
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "{:?}", err);
        assert_eq!(err.endpoint(), "http://127.0.0.1:1");
    }
}

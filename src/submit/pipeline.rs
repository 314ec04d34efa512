//! Single-transaction path: sign → submit → confirm

use super::confirmation::ConfirmationWaiter;
use super::errors::SubmissionError;
use super::submitter::TransactionSubmitter;
use crate::config::PipelineConfig;
use crate::errors::{PipelineError, PreparationError};
use crate::observability::TraceContext;
use crate::rpc::{EndpointPool, LedgerClient};
use crate::types::{
    Commitment, ConfirmationResult, Deadline, NetworkId, SignedTransaction,
    UnsignedTransactionEnvelope,
};
use crate::wallet::{WalletHandle, WalletSigner};
use solana_sdk::signature::Signature;
use std::sync::Arc;
use tracing::{info, warn, Instrument};

pub struct TransactionPipeline<C: LedgerClient + ?Sized> {
    signer: WalletSigner,
    submitter: TransactionSubmitter<C>,
    waiter: ConfirmationWaiter<C>,
    commitment: Commitment,
    network: Option<NetworkId>,
}

impl<C: LedgerClient + ?Sized> TransactionPipeline<C> {
    pub fn new(pool: Arc<EndpointPool>, client: Arc<C>, config: &PipelineConfig) -> Self {
        Self {
            signer: WalletSigner::new(config.signing.timeout()),
            submitter: TransactionSubmitter::new(pool.clone(), client.clone(), &config.rpc),
            waiter: ConfirmationWaiter::new(pool, client, &config.confirmation),
            commitment: config.confirmation.commitment,
            network: None,
        }
    }

    /// Refuse envelopes prepared for any other network
    pub fn for_network(mut self, network: NetworkId) -> Self {
        self.network = Some(network);
        self
    }

    pub fn submitter(&self) -> &TransactionSubmitter<C> {
        &self.submitter
    }

    pub fn waiter(&self) -> &ConfirmationWaiter<C> {
        &self.waiter
    }

    /// Sign the envelope with the selected wallet, submit it and wait for the
    /// configured commitment.
    ///
    /// An on-chain execution error becomes `TransactionFailed`; a confirmation
    /// timeout stays ambiguous.
    pub async fn execute(
        &self,
        envelope: UnsignedTransactionEnvelope,
        handle: &WalletHandle,
        deadline: Deadline,
    ) -> Result<ConfirmationResult, PipelineError> {
        let trace = TraceContext::new("execute");
        async move {
            let last_valid = envelope.metadata().last_valid_block_height;
            self.check_network(&envelope)?;
            let tx = envelope.into_transaction()?;

            let signed = self.signer.sign(handle, tx, deadline).await?;
            self.submit_and_confirm(&signed, last_valid, deadline).await
        }
        .instrument(trace.span())
        .await
    }

    /// Same as [`execute`](Self::execute) but lets the wallet submit, falling
    /// back to local signing and submission through the pool
    pub async fn execute_sign_and_send(
        &self,
        envelope: UnsignedTransactionEnvelope,
        handle: &WalletHandle,
        deadline: Deadline,
    ) -> Result<ConfirmationResult, PipelineError> {
        let trace = TraceContext::new("execute_sign_and_send");
        async move {
            let metadata = envelope.metadata().clone();
            self.check_network(&envelope)?;
            let tx = envelope.into_transaction()?;

            let submitted = self
                .signer
                .sign_and_submit(handle, tx, metadata.network, &self.submitter, deadline)
                .await;
            let signature = self.settle(submitted).await?;
            self.confirm(signature, metadata.last_valid_block_height, deadline)
                .await
        }
        .instrument(trace.span())
        .await
    }

    /// Submit already signed bytes and wait for the configured commitment
    pub async fn submit_and_confirm(
        &self,
        signed: &SignedTransaction,
        last_valid_block_height: Option<u64>,
        deadline: Deadline,
    ) -> Result<ConfirmationResult, PipelineError> {
        let submitted = self
            .submitter
            .submit(signed, deadline)
            .await
            .map_err(PipelineError::from);
        let signature = self.settle(submitted).await?;
        self.confirm(signature, last_valid_block_height, deadline)
            .await
    }

    /// Look up a submission left in doubt once. A signature the ledger knows
    /// goes on to confirmation; otherwise the error stays ambiguous.
    async fn settle(
        &self,
        submitted: Result<Signature, PipelineError>,
    ) -> Result<Signature, PipelineError> {
        let (signature, attempts, cause) = match submitted {
            Err(PipelineError::Submission(SubmissionError::Unresolved {
                signature,
                attempts,
                cause,
            })) => (signature, attempts, cause),
            other => return other,
        };

        match self.waiter.status_once(&signature).await {
            Ok(Some(status)) => {
                info!(signature = %signature, slot = status.slot, "Submission in doubt found on ledger");
                Ok(signature)
            }
            Ok(None) | Err(_) => {
                warn!(signature = %signature, cause = %cause, "Submission outcome unknown");
                Err(SubmissionError::Unresolved {
                    signature,
                    attempts,
                    cause,
                }
                .into())
            }
        }
    }

    async fn confirm(
        &self,
        signature: Signature,
        last_valid_block_height: Option<u64>,
        deadline: Deadline,
    ) -> Result<ConfirmationResult, PipelineError> {
        let result = self
            .waiter
            .wait(signature, self.commitment, last_valid_block_height, deadline)
            .await?;

        if result.landed {
            info!(signature = %signature, slot = ?result.slot, "Transaction landed");
            Ok(result)
        } else {
            let reason = result.error.clone().unwrap_or_default();
            warn!(signature = %signature, reason = %reason, "Transaction failed");
            Err(PipelineError::TransactionFailed {
                signature,
                slot: result.slot,
                reason,
            })
        }
    }

    fn check_network(&self, envelope: &UnsignedTransactionEnvelope) -> Result<(), PreparationError> {
        match self.network {
            Some(expected) if expected != envelope.metadata().network => {
                Err(PreparationError::NetworkMismatch {
                    expected: expected.as_str().to_string(),
                    actual: envelope.metadata().network.as_str().to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

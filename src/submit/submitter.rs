//! Two-phase submission across the endpoint pool
//!
//! One attempt against an endpoint sends the signed bytes with preflight
//! simulation and, when that fails for a transient reason, immediately resends
//! the same bytes with preflight skipped. Attempts rotate through the pool in
//! preference order, `attempts_per_endpoint` times per endpoint.

use super::errors::SubmissionError;
use crate::metrics::metrics;
use crate::retry::{run_with_rotation, RetryError, RetryPolicy, Retryable};
use crate::rpc::{EndpointPool, LedgerClient, RpcConfig, RpcEndpoint, RpcError, SendOptions};
use crate::types::{AttemptOutcome, Deadline, SignedTransaction, SubmissionAttempt};
use parking_lot::Mutex;
use solana_sdk::{signature::Signature, transaction::VersionedTransaction};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// Failure of one attempt (both phases) against one endpoint
#[derive(Debug)]
enum AttemptError {
    Rpc(RpcError),
    Mismatch { endpoint: String, returned: Signature },
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Rpc(err) => write!(f, "{}", err),
            AttemptError::Mismatch { endpoint, returned } => {
                write!(f, "{} returned unexpected signature {}", endpoint, returned)
            }
        }
    }
}

impl Retryable for AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Rpc(err) => err.is_retryable(),
            AttemptError::Mismatch { .. } => false,
        }
    }
}

pub struct TransactionSubmitter<C: LedgerClient + ?Sized> {
    pool: Arc<EndpointPool>,
    client: Arc<C>,
    attempts_per_endpoint: u32,
    base_delay: Duration,
    max_delay: Duration,
    options: SendOptions,
}

impl<C: LedgerClient + ?Sized> fmt::Debug for TransactionSubmitter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionSubmitter")
            .field("endpoints", &self.pool.len())
            .field("attempts_per_endpoint", &self.attempts_per_endpoint)
            .field("options", &self.options)
            .finish()
    }
}

impl<C: LedgerClient + ?Sized> TransactionSubmitter<C> {
    pub fn new(pool: Arc<EndpointPool>, client: Arc<C>, config: &RpcConfig) -> Self {
        Self {
            pool,
            client,
            attempts_per_endpoint: config.attempts_per_endpoint.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            options: SendOptions::strict(config.preflight_commitment, config.node_max_retries),
        }
    }

    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Policy for the current pool size: every endpoint gets its share of attempts
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            ..RetryPolicy::rpc_submission(self.pool.len(), self.attempts_per_endpoint)
        }
    }

    /// Submit fully signed bytes; returns the signature the ledger accepted.
    ///
    /// The same bytes are retransmitted on every attempt, so the returned
    /// signature is always the transaction's own. When retries run out after
    /// a send that timed out or lost its connection mid-request, the result
    /// is `Unresolved` rather than `Exhausted`.
    #[instrument(skip(self, tx, deadline), fields(signature = %tx.signature()))]
    pub async fn submit(
        &self,
        tx: &SignedTransaction,
        deadline: Deadline,
    ) -> Result<Signature, SubmissionError> {
        let missing = tx.missing_signers();
        if !missing.is_empty() {
            return Err(SubmissionError::NotFullySigned { missing });
        }

        let expected = tx.signature();
        let endpoints = self.pool.ordered();
        let policy = self.retry_policy();
        let in_doubt: Mutex<Option<RpcError>> = Mutex::new(None);

        let result = run_with_rotation(&policy, endpoints.len(), deadline, |ctx| {
            let endpoint = endpoints[ctx.endpoint].clone();
            let in_doubt = &in_doubt;
            async move {
                self.attempt(&endpoint, tx.transaction(), expected, ctx.attempt, in_doubt)
                    .await
            }
        })
        .await;

        let in_doubt = in_doubt.into_inner();

        let result = match result {
            Ok(signature) => {
                info!(signature = %signature, "Transaction accepted");
                return Ok(signature);
            }
            Err(RetryError::NoEndpoints) => SubmissionError::NoEndpoints,
            Err(RetryError::Fatal { error, endpoint, .. }) => match error {
                AttemptError::Rpc(source) => SubmissionError::Permanent {
                    endpoint: endpoints[endpoint].url().to_string(),
                    source,
                },
                AttemptError::Mismatch { endpoint, returned } => {
                    SubmissionError::SignatureMismatch {
                        endpoint,
                        expected,
                        returned,
                    }
                }
            },
            Err(RetryError::Exhausted {
                attempts,
                endpoint,
                error,
            }) => match in_doubt {
                Some(cause) => SubmissionError::Unresolved {
                    signature: expected,
                    attempts,
                    cause,
                },
                None => SubmissionError::Exhausted {
                    attempts,
                    last_endpoint: endpoints[endpoint].url().to_string(),
                    last_error: into_rpc_error(error, endpoints[endpoint].url()),
                },
            },
            Err(RetryError::DeadlineExceeded { attempts, last }) => match in_doubt {
                Some(cause) => SubmissionError::Unresolved {
                    signature: expected,
                    attempts,
                    cause,
                },
                None => SubmissionError::DeadlineExceeded {
                    attempts,
                    last_error: last.map(|(endpoint, error)| {
                        into_rpc_error(error, endpoints[endpoint].url())
                    }),
                },
            },
        };

        metrics().submission_failures_total.inc();
        warn!(error = %result, category = result.category(), "Submission failed");
        Err(result)
    }

    /// Strict phase, then an immediate relaxed phase on transient failure.
    ///
    /// The last send error that may have reached a node is kept in `in_doubt`.
    async fn attempt(
        &self,
        endpoint: &RpcEndpoint,
        tx: &VersionedTransaction,
        expected: Signature,
        attempt: u32,
        in_doubt: &Mutex<Option<RpcError>>,
    ) -> Result<Signature, AttemptError> {
        let strict = self.send_phase(endpoint, tx, self.options, attempt).await;
        note_in_doubt(&strict, in_doubt);
        match strict {
            Ok(signature) => return check_signature(endpoint, expected, signature),
            Err(RpcError::AlreadyProcessed { .. }) => return Ok(expected),
            Err(error) if !error.is_retryable() => return Err(AttemptError::Rpc(error)),
            Err(_) => {}
        }

        let relaxed = self
            .send_phase(endpoint, tx, self.options.relaxed(), attempt)
            .await;
        note_in_doubt(&relaxed, in_doubt);
        match relaxed {
            Ok(signature) => check_signature(endpoint, expected, signature),
            Err(RpcError::AlreadyProcessed { .. }) => Ok(expected),
            Err(error) => Err(AttemptError::Rpc(error)),
        }
    }

    async fn send_phase(
        &self,
        endpoint: &RpcEndpoint,
        tx: &VersionedTransaction,
        options: SendOptions,
        attempt: u32,
    ) -> Result<Signature, RpcError> {
        metrics().submission_attempts_total.inc();
        let started = Instant::now();
        let result = self.client.send_transaction(endpoint.url(), tx, options).await;
        let latency = started.elapsed();

        let outcome = match &result {
            Ok(signature) => {
                self.pool.record_success(endpoint, latency);
                AttemptOutcome::Accepted(*signature)
            }
            Err(error) => {
                if error.counts_against_endpoint() {
                    self.pool.record_failure(endpoint, latency);
                } else {
                    self.pool.record_success(endpoint, latency);
                }
                AttemptOutcome::Rejected(error.to_string())
            }
        };

        SubmissionAttempt {
            endpoint: endpoint.url().to_string(),
            skip_preflight: options.skip_preflight,
            outcome,
        }
        .log(attempt);

        result
    }
}

fn note_in_doubt(result: &Result<Signature, RpcError>, in_doubt: &Mutex<Option<RpcError>>) {
    if let Err(error) = result {
        if error.may_have_delivered() {
            *in_doubt.lock() = Some(error.clone());
        }
    }
}

fn check_signature(
    endpoint: &RpcEndpoint,
    expected: Signature,
    returned: Signature,
) -> Result<Signature, AttemptError> {
    if returned == expected {
        Ok(returned)
    } else {
        Err(AttemptError::Mismatch {
            endpoint: endpoint.url().to_string(),
            returned,
        })
    }
}

fn into_rpc_error(error: AttemptError, endpoint: &str) -> RpcError {
    match error {
        AttemptError::Rpc(error) => error,
        AttemptError::Mismatch { returned, .. } => RpcError::RpcResponse {
            endpoint: endpoint.to_string(),
            message: format!("unexpected signature {}", returned),
            code: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat;
    use crate::rpc::{RpcEndpointConfig, SignatureStatus};
    use crate::types::Commitment;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use solana_sdk::{
        hash::Hash,
        message::{v0::Message as MessageV0, VersionedMessage},
        pubkey::Pubkey,
        signature::Keypair,
        signer::Signer,
    };
    #[allow(deprecated)]
    use solana_sdk::system_instruction;
    use std::collections::VecDeque;

    /// Ledger that answers sends from a script and records every call
    #[derive(Default)]
    struct ScriptedLedger {
        responses: Mutex<VecDeque<Result<Option<Signature>, String>>>,
        calls: Mutex<Vec<(String, bool)>>,
    }

    impl ScriptedLedger {
        fn new(responses: Vec<Result<Option<Signature>, &str>>) -> Self {
            Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|r| r.map_err(str::to_string))
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, bool)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl LedgerClient for ScriptedLedger {
        async fn send_transaction(
            &self,
            endpoint: &str,
            tx: &VersionedTransaction,
            options: SendOptions,
        ) -> Result<Signature, RpcError> {
            self.calls
                .lock()
                .push((endpoint.to_string(), options.skip_preflight));
            match self.responses.lock().pop_front() {
                Some(Ok(Some(signature))) => Ok(signature),
                Some(Ok(None)) | None => Ok(tx.signatures[0]),
                Some(Err(message)) => Err(RpcError::classify(&message, endpoint, None)),
            }
        }

        async fn get_signature_status(
            &self,
            _endpoint: &str,
            _signature: &Signature,
        ) -> Result<Option<SignatureStatus>, RpcError> {
            Ok(None)
        }

        async fn get_latest_blockhash(
            &self,
            _endpoint: &str,
            _commitment: Commitment,
        ) -> Result<(Hash, u64), RpcError> {
            Ok((Hash::default(), 0))
        }

        async fn get_block_height(
            &self,
            _endpoint: &str,
            _commitment: Commitment,
        ) -> Result<u64, RpcError> {
            Ok(0)
        }
    }

    fn signed_tx() -> SignedTransaction {
        let payer = Keypair::new();
        #[allow(deprecated)]
        let ix = system_instruction::transfer(&payer.pubkey(), &Pubkey::new_unique(), 10);
        let message = MessageV0::try_compile(&payer.pubkey(), &[ix], &[], Hash::new_unique()).unwrap();
        let mut tx = compat::unsigned_transaction(VersionedMessage::V0(message));
        tx.signatures[0] = payer.sign_message(&tx.message.serialize());
        SignedTransaction::new(tx)
    }

    fn submitter(ledger: Arc<ScriptedLedger>, urls: &[&str]) -> TransactionSubmitter<ScriptedLedger> {
        let pool = Arc::new(EndpointPool::new(
            urls.iter()
                .enumerate()
                .map(|(i, url)| RpcEndpointConfig::new(*url, i as u32))
                .collect(),
            3,
        ));
        let config = RpcConfig {
            retry_base_delay_ms: 10,
            retry_max_delay_ms: 50,
            ..RpcConfig::default()
        };
        TransactionSubmitter::new(pool, ledger, &config)
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_healthy_endpoint_one_attempt() {
        let ledger = Arc::new(ScriptedLedger::new(vec![]));
        let submitter = submitter(ledger.clone(), &["https://a.example"]);
        let tx = signed_tx();

        let signature = submitter.submit(&tx, deadline()).await.unwrap();
        assert_eq!(signature, tx.signature());
        assert_eq!(ledger.calls(), vec![("https://a.example".to_string(), false)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relaxed_retry_after_transient_preflight_failure() {
        let ledger = Arc::new(ScriptedLedger::new(vec![Err(
            "Transaction simulation failed: Blockhash not found",
        )]));
        let submitter = submitter(ledger.clone(), &["https://a.example"]);
        let tx = signed_tx();

        assert_eq!(submitter.submit(&tx, deadline()).await.unwrap(), tx.signature());
        assert_eq!(
            ledger.calls(),
            vec![
                ("https://a.example".to_string(), false),
                ("https://a.example".to_string(), true)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_rejection_surfaces_immediately() {
        let ledger = Arc::new(ScriptedLedger::new(vec![Err(
            "Transaction simulation failed: Attempt to debit an account but found no record of a prior credit.",
        )]));
        let submitter = submitter(ledger.clone(), &["https://a.example", "https://b.example"]);

        let err = submitter.submit(&signed_tx(), deadline()).await.unwrap_err();
        assert!(matches!(
            err,
            SubmissionError::Permanent { source: RpcError::InsufficientFunds { .. }, .. }
        ));
        assert!(!err.is_retryable());
        assert_eq!(ledger.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_bounded_and_rotate_endpoints() {
        let failures = vec![Err("error sending request: connection refused"); 12];
        let ledger = Arc::new(ScriptedLedger::new(failures));
        let submitter = submitter(ledger.clone(), &["https://a.example", "https://b.example"]);

        let err = submitter.submit(&signed_tx(), deadline()).await.unwrap_err();
        match &err {
            SubmissionError::Exhausted { attempts, last_endpoint, .. } => {
                assert_eq!(*attempts, 6);
                assert_eq!(last_endpoint, "https://b.example");
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(err.is_retryable());

        // 3 attempts x 2 phases per endpoint, a before b
        let calls = ledger.calls();
        assert_eq!(calls.len(), 12);
        assert!(calls[..6].iter().all(|(url, _)| url == "https://a.example"));
        assert!(calls[6..].iter().all(|(url, _)| url == "https://b.example"));
        assert!(calls.chunks(2).all(|pair| !pair[0].1 && pair[1].1));

        assert_eq!(submitter.pool().healthy_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_sends_leave_submission_unresolved() {
        let ledger = Arc::new(ScriptedLedger::new(vec![Err("operation timed out"); 6]));
        let submitter = submitter(ledger.clone(), &["https://a.example"]);
        let tx = signed_tx();

        let err = submitter.submit(&tx, deadline()).await.unwrap_err();
        match &err {
            SubmissionError::Unresolved { signature, attempts, cause } => {
                assert_eq!(*signature, tx.signature());
                assert_eq!(*attempts, 3);
                assert!(matches!(cause, RpcError::Timeout { .. }));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(err.is_ambiguous());
        assert!(!err.is_retryable());
        assert_eq!(ledger.calls().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_processed_counts_as_accepted() {
        let ledger = Arc::new(ScriptedLedger::new(vec![
            Err("timed out"),
            Err("This transaction has already been processed"),
        ]));
        let submitter = submitter(ledger.clone(), &["https://a.example"]);
        let tx = signed_tx();

        assert_eq!(submitter.submit(&tx, deadline()).await.unwrap(), tx.signature());
    }

    #[tokio::test(start_paused = true)]
    async fn test_signature_mismatch_is_fatal() {
        let other = Signature::from([7u8; 64]);
        let ledger = Arc::new(ScriptedLedger::new(vec![Ok(Some(other))]));
        let submitter = submitter(ledger, &["https://a.example"]);

        let err = submitter.submit(&signed_tx(), deadline()).await.unwrap_err();
        assert!(matches!(err, SubmissionError::SignatureMismatch { returned, .. } if returned == other));
    }

    #[tokio::test]
    async fn test_unsigned_transaction_rejected_before_sending() {
        let ledger = Arc::new(ScriptedLedger::new(vec![]));
        let submitter = submitter(ledger.clone(), &["https://a.example"]);
        let mut tx = signed_tx().into_inner();
        tx.signatures[0] = Signature::default();

        let err = submitter
            .submit(&SignedTransaction::new(tx), deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::NotFullySigned { .. }));
        assert!(ledger.calls().is_empty());
    }
}

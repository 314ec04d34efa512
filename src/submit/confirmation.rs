//! Polls signature status until the target commitment or the deadline

use super::errors::ConfirmationError;
use crate::config::ConfirmationConfig;
use crate::metrics::metrics;
use crate::rpc::{EndpointPool, LedgerClient, RpcEndpoint, RpcError, SignatureStatus};
use crate::types::{Commitment, ConfirmationResult, Deadline};
use solana_sdk::signature::Signature;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

pub struct ConfirmationWaiter<C: LedgerClient + ?Sized> {
    pool: Arc<EndpointPool>,
    client: Arc<C>,
    poll_interval: Duration,
    timeout: Duration,
}

impl<C: LedgerClient + ?Sized> std::fmt::Debug for ConfirmationWaiter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationWaiter")
            .field("poll_interval", &self.poll_interval)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<C: LedgerClient + ?Sized> ConfirmationWaiter<C> {
    pub fn new(pool: Arc<EndpointPool>, client: Arc<C>, config: &ConfirmationConfig) -> Self {
        Self {
            pool,
            client,
            poll_interval: config.poll_interval(),
            timeout: config.timeout(),
        }
    }

    /// Wait until `signature` reaches `target` or the deadline passes.
    ///
    /// Returns `landed = false` only when the ledger reports an execution
    /// error. Not-found answers and endpoint errors keep polling, rotating to
    /// the next endpoint after an error. When `last_valid_block_height` is
    /// known, the block height is read before the status so that an unknown
    /// signature past that height is conclusively expired.
    #[instrument(skip(self, signature, target, deadline), fields(signature = %signature, target = %target.as_str()))]
    pub async fn wait(
        &self,
        signature: Signature,
        target: Commitment,
        last_valid_block_height: Option<u64>,
        deadline: Deadline,
    ) -> Result<ConfirmationResult, ConfirmationError> {
        let deadline = deadline.min(Deadline::after(self.timeout));
        let started = Instant::now();
        let mut cursor = 0usize;
        let mut last_seen: Option<Commitment> = None;

        loop {
            let endpoints = self.pool.ordered();
            if endpoints.is_empty() {
                return Err(ConfirmationError::NoEndpoints);
            }
            let endpoint = &endpoints[cursor % endpoints.len()];

            match self
                .poll_once(endpoint, &signature, last_valid_block_height)
                .await
            {
                Ok((Some(status), _)) => {
                    last_seen = Some(status.commitment);
                    if status.commitment.satisfies(target) {
                        metrics()
                            .confirmation_latency
                            .observe(started.elapsed().as_secs_f64());
                        return Ok(match status.error {
                            Some(error) => {
                                warn!(slot = status.slot, error = %error, "Transaction failed on chain");
                                ConfirmationResult::failed(signature, status.slot, error)
                            }
                            None => {
                                info!(slot = status.slot, "Transaction confirmed");
                                ConfirmationResult::landed(signature, status.slot)
                            }
                        });
                    }
                    debug!(seen = %status.commitment.as_str(), "Below target commitment");
                }
                Ok((None, Some(block_height))) => {
                    if let Some(last_valid) = last_valid_block_height {
                        if block_height > last_valid {
                            warn!(block_height, last_valid, "Blockhash expired before landing");
                            return Err(ConfirmationError::BlockhashExpired {
                                signature,
                                last_valid_block_height: last_valid,
                                block_height,
                            });
                        }
                    }
                }
                Ok((None, None)) => {}
                Err(error) => {
                    debug!(endpoint = %endpoint.url(), error = %error, "Status poll failed, rotating");
                    cursor += 1;
                }
            }

            let remaining = deadline.remaining();
            if remaining < self.poll_interval {
                metrics().confirmation_timeouts_total.inc();
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(waited_ms, last_seen = ?last_seen, "Confirmation timed out");
                return Err(ConfirmationError::Timeout {
                    signature,
                    waited_ms,
                    last_seen,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One status read, preceded by a block height read when expiry matters
    async fn poll_once(
        &self,
        endpoint: &RpcEndpoint,
        signature: &Signature,
        last_valid_block_height: Option<u64>,
    ) -> Result<(Option<SignatureStatus>, Option<u64>), RpcError> {
        let block_height = match last_valid_block_height {
            Some(_) => Some(
                self.observe(endpoint, self.client.get_block_height(endpoint.url(), Commitment::Confirmed))
                    .await?,
            ),
            None => None,
        };
        let status = self
            .observe(endpoint, self.client.get_signature_status(endpoint.url(), signature))
            .await?;
        Ok((status, block_height))
    }

    async fn observe<T>(
        &self,
        endpoint: &RpcEndpoint,
        call: impl std::future::Future<Output = Result<T, RpcError>>,
    ) -> Result<T, RpcError> {
        let started = Instant::now();
        let result = call.await;
        match &result {
            Err(error) if error.counts_against_endpoint() => {
                self.pool.record_failure(endpoint, started.elapsed())
            }
            _ => self.pool.record_success(endpoint, started.elapsed()),
        }
        result
    }

    /// Single status lookup, falling through endpoints until one answers
    pub async fn status_once(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureStatus>, ConfirmationError> {
        let endpoints = self.pool.ordered();
        if endpoints.is_empty() {
            return Err(ConfirmationError::NoEndpoints);
        }
        for endpoint in &endpoints {
            match self
                .observe(endpoint, self.client.get_signature_status(endpoint.url(), signature))
                .await
            {
                Ok(status) => return Ok(status),
                Err(error) => {
                    debug!(endpoint = %endpoint.url(), error = %error, "Status lookup failed")
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{RpcEndpointConfig, SendOptions};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use solana_sdk::{hash::Hash, transaction::VersionedTransaction};
    use std::collections::VecDeque;

    type StatusScript = Result<Option<SignatureStatus>, String>;

    #[derive(Default)]
    struct ScriptedStatus {
        statuses: Mutex<VecDeque<StatusScript>>,
        heights: Mutex<VecDeque<u64>>,
        polled: Mutex<Vec<String>>,
    }

    impl ScriptedStatus {
        fn new(statuses: Vec<StatusScript>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
                ..Default::default()
            }
        }

        fn with_heights(self, heights: Vec<u64>) -> Self {
            *self.heights.lock() = heights.into();
            self
        }
    }

    #[async_trait]
    impl LedgerClient for ScriptedStatus {
        async fn send_transaction(
            &self,
            _endpoint: &str,
            tx: &VersionedTransaction,
            _options: SendOptions,
        ) -> Result<Signature, RpcError> {
            Ok(tx.signatures[0])
        }

        async fn get_signature_status(
            &self,
            endpoint: &str,
            _signature: &Signature,
        ) -> Result<Option<SignatureStatus>, RpcError> {
            self.polled.lock().push(endpoint.to_string());
            match self.statuses.lock().pop_front() {
                Some(Ok(status)) => Ok(status),
                Some(Err(message)) => Err(RpcError::classify(&message, endpoint, None)),
                None => Ok(None),
            }
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
            Ok(self.heights.lock().pop_front().unwrap_or(0))
        }
    }

    fn status(slot: u64, commitment: Commitment, error: Option<&str>) -> StatusScript {
        Ok(Some(SignatureStatus {
            slot,
            commitment,
            error: error.map(str::to_string),
        }))
    }

    fn waiter(ledger: Arc<ScriptedStatus>) -> ConfirmationWaiter<ScriptedStatus> {
        let pool = Arc::new(EndpointPool::new(
            vec![
                RpcEndpointConfig::new("https://a.example", 0),
                RpcEndpointConfig::new("https://b.example", 1),
            ],
            3,
        ));
        let config = ConfirmationConfig {
            poll_interval_ms: 500,
            timeout_ms: 10_000,
            ..ConfirmationConfig::default()
        };
        ConfirmationWaiter::new(pool, ledger, &config)
    }

    fn sig() -> Signature {
        Signature::from([3u8; 64])
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_then_confirmed() {
        let ledger = Arc::new(ScriptedStatus::new(vec![
            Ok(None),
            status(90, Commitment::Processed, None),
            status(90, Commitment::Confirmed, None),
        ]));
        let result = waiter(ledger.clone())
            .wait(sig(), Commitment::Confirmed, None, Deadline::after(Duration::from_secs(30)))
            .await
            .unwrap();

        assert!(result.landed);
        assert_eq!(result.slot, Some(90));
        assert_eq!(ledger.polled.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execution_error_is_failure_not_timeout() {
        let ledger = Arc::new(ScriptedStatus::new(vec![status(
            12,
            Commitment::Finalized,
            Some("InstructionError(0, Custom(6001))"),
        )]));
        let result = waiter(ledger)
            .wait(sig(), Commitment::Confirmed, None, Deadline::after(Duration::from_secs(30)))
            .await
            .unwrap();

        assert!(!result.landed);
        assert_eq!(result.error.as_deref(), Some("InstructionError(0, Custom(6001))"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_ambiguous_and_never_landed() {
        let ledger = Arc::new(ScriptedStatus::new(vec![status(
            5,
            Commitment::Processed,
            None,
        )]));
        let err = waiter(ledger)
            .wait(sig(), Commitment::Finalized, None, Deadline::after(Duration::from_secs(2)))
            .await
            .unwrap_err();

        match &err {
            ConfirmationError::Timeout { last_seen, .. } => {
                assert_eq!(*last_seen, Some(Commitment::Processed))
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(err.is_ambiguous());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_error_rotates_endpoint() {
        let ledger = Arc::new(ScriptedStatus::new(vec![
            Err("connection refused".to_string()),
            status(7, Commitment::Confirmed, None),
        ]));
        waiter(ledger.clone())
            .wait(sig(), Commitment::Confirmed, None, Deadline::after(Duration::from_secs(30)))
            .await
            .unwrap();

        assert_eq!(
            *ledger.polled.lock(),
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_blockhash_expiry_is_conclusive() {
        let ledger = Arc::new(
            ScriptedStatus::new(vec![Ok(None), Ok(None)]).with_heights(vec![100, 151]),
        );
        let err = waiter(ledger)
            .wait(sig(), Commitment::Confirmed, Some(150), Deadline::after(Duration::from_secs(30)))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ConfirmationError::BlockhashExpired {
                signature: sig(),
                last_valid_block_height: 150,
                block_height: 151,
            }
        );
        assert!(!err.is_ambiguous());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_once_falls_through() {
        let ledger = Arc::new(ScriptedStatus::new(vec![
            Err("timed out".to_string()),
            status(3, Commitment::Finalized, None),
        ]));
        let found = waiter(ledger).status_once(&sig()).await.unwrap();
        assert_eq!(found.map(|s| s.slot), Some(3));
    }
}

//! Multi-transaction path: build → co-sign → wallet sign → relay → poll

use super::relay::BundleRelayClient;
use super::status::BundleStatusPoller;
use super::types::{Bundle, BundleStatus};
use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::observability::TraceContext;
use crate::rpc::{EndpointPool, LedgerClient};
use crate::submit::ConfirmationWaiter;
use crate::tx_builder::{AtomicBundleBuilder, BuildError, ComputeMargin, InstructionSequence};
use crate::types::{Commitment, Deadline};
use crate::wallet::{WalletHandle, WalletSigner};
use solana_sdk::{hash::Hash, signature::Signature};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// What a successful launch produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchReceipt {
    pub bundle_id: String,
    /// First signature of every transaction, in bundle order
    pub signatures: Vec<Signature>,
    pub landed_slot: Option<u64>,
    /// The relay never reported a terminal status; landing was confirmed
    /// through the ledger instead
    pub reconciled: bool,
}

pub struct LaunchPipeline<C: LedgerClient + ?Sized> {
    relay: Arc<BundleRelayClient>,
    poller: BundleStatusPoller,
    signer: WalletSigner,
    waiter: ConfirmationWaiter<C>,
    pool: Arc<EndpointPool>,
    client: Arc<C>,
    tip_lamports: u64,
    margin: ComputeMargin,
    commitment: Commitment,
}

impl<C: LedgerClient + ?Sized> LaunchPipeline<C> {
    pub fn new(
        relay: Arc<BundleRelayClient>,
        pool: Arc<EndpointPool>,
        client: Arc<C>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            relay,
            poller: BundleStatusPoller::from_config(&config.bundle_status),
            signer: WalletSigner::new(config.signing.timeout()),
            waiter: ConfirmationWaiter::new(pool.clone(), client.clone(), &config.confirmation),
            pool,
            client,
            tip_lamports: config.bundle.tip_lamports,
            margin: ComputeMargin::from_config(&config.bundle),
            commitment: config.confirmation.commitment,
        }
    }

    pub fn with_poller(mut self, poller: BundleStatusPoller) -> Self {
        self.poller = poller;
        self
    }

    pub fn relay(&self) -> &BundleRelayClient {
        &self.relay
    }

    /// Build one atomic bundle from `transactions` (each an ordered list of
    /// sequences merged into one transaction), sign it with the wallet and
    /// land it through the relay.
    ///
    /// A bundle the relay never resolves, or whose `sendBundle` answer was
    /// lost, is checked against the ledger before reporting a timeout.
    pub async fn launch(
        &self,
        handle: &WalletHandle,
        transactions: Vec<Vec<InstructionSequence>>,
        deadline: Deadline,
    ) -> Result<LaunchReceipt, PipelineError> {
        let trace = TraceContext::new("launch");
        let relay_trace = trace.child_span("relay");
        async move {
            let started = Instant::now();
            let tip_account = self.relay.random_tip_account(deadline).await?;
            let (blockhash, last_valid) = self.latest_blockhash().await?;

            let mut builder = AtomicBundleBuilder::new(handle.address())
                .with_compute_margin(self.margin)
                .with_tip(tip_account, self.tip_lamports);
            for sequences in transactions {
                builder = sequences
                    .into_iter()
                    .fold(builder, |b, s| b.add_sequence(s))
                    .next_transaction();
            }

            let prepared = builder.build(blockhash)?;
            let co_signed = prepared
                .iter()
                .map(|p| p.co_sign())
                .collect::<Result<Vec<_>, BuildError>>()?;

            let signed = self.signer.sign_many(handle, co_signed, deadline).await?;
            let bundle = Bundle::new(signed, tip_account, self.tip_lamports)?;
            let signatures = bundle.signatures();

            debug!(
                transactions = bundle.len(),
                last_valid_block_height = last_valid,
                tip_account = %tip_account,
                "Bundle signed"
            );

            let (bundle_id, relay_status, relay_slot) = async {
                match self.relay.send_bundle(&bundle, deadline).await {
                    Ok(bundle_id) => {
                        let outcome = self.poller.poll(self.relay.as_ref(), &bundle_id, deadline).await;
                        Ok((bundle_id, outcome.status, outcome.landed_slot))
                    }
                    // the relay may hold the bundle; only the ledger can tell now
                    Err(err) if err.may_have_been_accepted() => {
                        let bundle_id = bundle.id();
                        warn!(bundle_id = %bundle_id, error = %err, "Bundle send outcome unknown");
                        Ok((bundle_id, BundleStatus::Timeout, None))
                    }
                    Err(err) => Err(PipelineError::from(err)),
                }
            }
            .instrument(relay_trace.span())
            .await?;

            let (status, landed_slot, reconciled) = match relay_status {
                BundleStatus::Timeout => {
                    let (status, slot) = self.reconcile(&signatures).await;
                    (status, slot, status == BundleStatus::Landed)
                }
                status => (status, relay_slot, false),
            };

            match status {
                BundleStatus::Landed => {
                    info!(
                        bundle_id = %bundle_id,
                        slot = ?landed_slot,
                        reconciled,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Launch bundle landed"
                    );
                    Ok(LaunchReceipt {
                        bundle_id,
                        signatures,
                        landed_slot,
                        reconciled,
                    })
                }
                BundleStatus::Failed => Err(PipelineError::BundleFailed {
                    bundle_id,
                    slot: landed_slot,
                }),
                BundleStatus::Invalid => Err(PipelineError::BundleInvalid { bundle_id }),
                BundleStatus::Pending | BundleStatus::Timeout => {
                    Err(PipelineError::BundleTimeout {
                        bundle_id,
                        signatures,
                    })
                }
            }
        }
        .instrument(trace.span())
        .await
    }

    /// Blockhash from the first endpoint that answers
    async fn latest_blockhash(&self) -> Result<(Hash, u64), BuildError> {
        let mut last_error = String::from("no endpoints configured");
        for endpoint in self.pool.ordered() {
            let started = Instant::now();
            match self
                .client
                .get_latest_blockhash(endpoint.url(), self.commitment)
                .await
            {
                Ok(found) => {
                    self.pool.record_success(&endpoint, started.elapsed());
                    return Ok(found);
                }
                Err(e) => {
                    self.pool.record_failure(&endpoint, started.elapsed());
                    debug!(endpoint = %endpoint.url(), error = %e, "Blockhash fetch failed");
                    last_error = e.to_string();
                }
            }
        }
        Err(BuildError::Blockhash(last_error))
    }

    /// Ledger view of a bundle the relay left unresolved.
    ///
    /// Bundles are all-or-nothing, so any transaction that executed with an
    /// error means the bundle failed, and all transactions being present
    /// means it landed.
    async fn reconcile(&self, signatures: &[Signature]) -> (BundleStatus, Option<u64>) {
        let mut landed_slot: Option<u64> = None;
        let mut all_found = true;

        for signature in signatures {
            match self.waiter.status_once(signature).await {
                Ok(Some(status)) if status.error.is_some() => {
                    warn!(signature = %signature, "Bundle transaction failed on chain");
                    return (BundleStatus::Failed, Some(status.slot));
                }
                Ok(Some(status)) if status.commitment.satisfies(self.commitment) => {
                    landed_slot = Some(landed_slot.map_or(status.slot, |s| s.max(status.slot)));
                }
                Ok(_) => all_found = false,
                Err(e) => {
                    debug!(signature = %signature, error = %e, "Reconciliation lookup failed");
                    all_found = false;
                }
            }
        }

        if all_found && !signatures.is_empty() {
            (BundleStatus::Landed, landed_slot)
        } else {
            (BundleStatus::Timeout, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::relay::BUNDLES_PATH;
    use crate::retry::RetryPolicy;
    use crate::rpc::{RpcEndpointConfig, RpcError, SendOptions, SignatureStatus};
    use crate::wallet::{KeypairWallet, WalletCapability};
    use async_trait::async_trait;
    use mockito::Matcher;
    use parking_lot::Mutex;
    use serde_json::json;
    use solana_sdk::{
        instruction::{AccountMeta, Instruction},
        pubkey::Pubkey,
        signature::Keypair,
        signer::Signer,
        transaction::VersionedTransaction,
    };
    use std::io::Write;
    use std::time::Duration;

    /// Serves a blockhash and reports scripted statuses
    struct FakeLedger {
        landed: Mutex<Vec<Signature>>,
    }

    #[async_trait]
    impl LedgerClient for FakeLedger {
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
            _endpoint: &str,
            signature: &Signature,
        ) -> Result<Option<SignatureStatus>, RpcError> {
            Ok(self.landed.lock().contains(signature).then(|| SignatureStatus {
                slot: 900,
                commitment: Commitment::Finalized,
                error: None,
            }))
        }

        async fn get_latest_blockhash(
            &self,
            _endpoint: &str,
            _commitment: Commitment,
        ) -> Result<(Hash, u64), RpcError> {
            Ok((Hash::new_unique(), 1_000))
        }

        async fn get_block_height(
            &self,
            _endpoint: &str,
            _commitment: Commitment,
        ) -> Result<u64, RpcError> {
            Ok(10)
        }
    }

    fn sequence(label: &str, tag: u8) -> InstructionSequence {
        InstructionSequence::new(
            label,
            vec![Instruction::new_with_bytes(
                Pubkey::new_unique(),
                &[tag],
                vec![AccountMeta::new(Pubkey::new_unique(), false)],
            )],
        )
    }

    fn pipeline(
        server_url: String,
        tip: Pubkey,
        ledger: Arc<FakeLedger>,
    ) -> LaunchPipeline<FakeLedger> {
        let relay = BundleRelayClient::new(
            vec![server_url],
            RetryPolicy::relay(5, Duration::from_millis(5), Duration::from_millis(20)),
            Duration::from_secs(2),
        )
        .unwrap()
        .with_tip_accounts(vec![tip]);
        let pool = Arc::new(EndpointPool::new(
            vec![RpcEndpointConfig::new("http://rpc.local", 0)],
            3,
        ));

        LaunchPipeline::new(Arc::new(relay), pool, ledger, &PipelineConfig::default()).with_poller(
            BundleStatusPoller::new(
                Duration::from_millis(10),
                Duration::from_millis(10),
                Duration::from_millis(200),
            ),
        )
    }

    fn handle() -> WalletHandle {
        let wallet: Arc<dyn WalletCapability> = Arc::new(KeypairWallet::from_keypair(Keypair::new()));
        WalletHandle::External(wallet)
    }

    #[tokio::test]
    async fn test_launch_lands() {
        let mut server = mockito::Server::new_async().await;
        let send = server
            .mock("POST", BUNDLES_PATH)
            .match_body(Matcher::PartialJson(json!({"method": "sendBundle"})))
            .with_status(200)
            .with_body(json!({"jsonrpc": "2.0", "id": 1, "result": "bundle-1"}).to_string())
            .expect(1)
            .create_async()
            .await;
        let status = server
            .mock("POST", BUNDLES_PATH)
            .match_body(Matcher::PartialJson(json!({"method": "getInflightBundleStatuses"})))
            .with_status(200)
            .with_body(
                json!({"jsonrpc": "2.0", "id": 1, "result": {"context": {"slot": 1}, "value": [
                    {"bundle_id": "bundle-1", "status": "Landed", "landed_slot": 812}
                ]}})
                .to_string(),
            )
            .create_async()
            .await;

        let ledger = Arc::new(FakeLedger {
            landed: Mutex::new(Vec::new()),
        });
        let pipeline = pipeline(server.url(), Pubkey::new_unique(), ledger);
        let receipt = pipeline
            .launch(
                &handle(),
                vec![vec![sequence("create", 1)], vec![sequence("buy", 2)]],
                Deadline::after(Duration::from_secs(10)),
            )
            .await
            .unwrap();

        assert_eq!(receipt.bundle_id, "bundle-1");
        assert_eq!(receipt.signatures.len(), 2);
        assert_eq!(receipt.landed_slot, Some(812));
        assert!(!receipt.reconciled);
        send.assert_async().await;
        status.assert_async().await;
    }

    #[tokio::test]
    async fn test_unresolved_bundle_reconciled_or_timed_out() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", BUNDLES_PATH)
            .match_body(Matcher::PartialJson(json!({"method": "sendBundle"})))
            .with_status(200)
            .with_body(json!({"jsonrpc": "2.0", "id": 1, "result": "bundle-2"}).to_string())
            .create_async()
            .await;
        server
            .mock("POST", BUNDLES_PATH)
            .match_body(Matcher::PartialJson(json!({"method": "getInflightBundleStatuses"})))
            .with_status(200)
            .with_body(json!({"jsonrpc": "2.0", "id": 1, "result": {"context": {"slot": 1}, "value": null}}).to_string())
            .create_async()
            .await;

        let ledger = Arc::new(FakeLedger {
            landed: Mutex::new(Vec::new()),
        });
        let pipeline = pipeline(server.url(), Pubkey::new_unique(), ledger.clone());

        let err = pipeline
            .launch(
                &handle(),
                vec![vec![sequence("create", 1)]],
                Deadline::after(Duration::from_secs(10)),
            )
            .await
            .unwrap_err();
        let signatures = match err {
            PipelineError::BundleTimeout { signatures, .. } => signatures,
            other => panic!("expected timeout, got {other:?}"),
        };
        assert_eq!(signatures.len(), 1);

        // the same signatures found on the ledger turn the timeout into a landing
        let (status, slot) = {
            ledger.landed.lock().extend(signatures.iter().copied());
            pipeline.reconcile(&signatures).await
        };
        assert_eq!(status, BundleStatus::Landed);
        assert_eq!(slot, Some(900));
    }

    #[tokio::test]
    async fn test_tip_below_relay_minimum_never_sent() {
        let mut server = mockito::Server::new_async().await;
        let send = server
            .mock("POST", BUNDLES_PATH)
            .expect(0)
            .create_async()
            .await;

        let ledger = Arc::new(FakeLedger {
            landed: Mutex::new(Vec::new()),
        });
        let mut config = PipelineConfig::default();
        config.bundle.tip_lamports = 1;
        let relay = BundleRelayClient::new(
            vec![server.url()],
            RetryPolicy::relay(5, Duration::from_millis(5), Duration::from_millis(20)),
            Duration::from_secs(2),
        )
        .unwrap()
        .with_tip_accounts(vec![Pubkey::new_unique()])
        .with_min_tip(1_000);
        let pool = Arc::new(EndpointPool::new(
            vec![RpcEndpointConfig::new("http://rpc.local", 0)],
            3,
        ));
        let pipeline = LaunchPipeline::new(Arc::new(relay), pool, ledger, &config);

        let err = pipeline
            .launch(
                &handle(),
                vec![vec![sequence("create", 1)]],
                Deadline::after(Duration::from_secs(5)),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Bundle(crate::bundle::BundleError::TipTooSmall { .. })
        ));
        send.assert_async().await;
    }

    #[tokio::test]
    async fn test_wallet_signs_after_co_signers() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", BUNDLES_PATH)
            .match_body(Matcher::PartialJson(json!({"method": "sendBundle"})))
            .with_status(200)
            .with_body(json!({"jsonrpc": "2.0", "id": 1, "result": "bundle-3"}).to_string())
            .create_async()
            .await;
        server
            .mock("POST", BUNDLES_PATH)
            .match_body(Matcher::PartialJson(json!({"method": "getInflightBundleStatuses"})))
            .with_status(200)
            .with_body(
                json!({"jsonrpc": "2.0", "id": 1, "result": {"context": {"slot": 1}, "value": [
                    {"bundle_id": "bundle-3", "status": "Landed", "landed_slot": 5}
                ]}})
                .to_string(),
            )
            .create_async()
            .await;

        let handle = handle();
        let mint = Arc::new(Keypair::new());
        let create = InstructionSequence::new(
            "create",
            vec![Instruction::new_with_bytes(
                Pubkey::new_unique(),
                &[1],
                vec![
                    AccountMeta::new(handle.address(), true),
                    AccountMeta::new(mint.pubkey(), true),
                ],
            )],
        )
        .with_co_signer(mint);

        let ledger = Arc::new(FakeLedger {
            landed: Mutex::new(Vec::new()),
        });
        let receipt = pipeline(server.url(), Pubkey::new_unique(), ledger)
            .launch(
                &handle,
                vec![vec![create], vec![sequence("buy", 2)]],
                Deadline::after(Duration::from_secs(10)),
            )
            .await
            .unwrap();
        assert_eq!(receipt.signatures.len(), 2);
    }

    #[tokio::test]
    async fn test_lost_send_response_is_reconciled_not_retryable() {
        let mut server = mockito::Server::new_async().await;
        let send = server
            .mock("POST", BUNDLES_PATH)
            .match_body(Matcher::PartialJson(json!({"method": "sendBundle"})))
            .with_status(200)
            .with_chunked_body(|w| {
                std::thread::sleep(Duration::from_millis(500));
                w.write_all(br#"{"jsonrpc":"2.0","id":1,"result":"late"}"#)
            })
            .expect_at_least(1)
            .create_async()
            .await;

        let tip = Pubkey::new_unique();
        let relay = BundleRelayClient::new(
            vec![server.url()],
            RetryPolicy::relay(2, Duration::from_millis(5), Duration::from_millis(20)),
            Duration::from_millis(100),
        )
        .unwrap()
        .with_tip_accounts(vec![tip]);
        let pool = Arc::new(EndpointPool::new(
            vec![RpcEndpointConfig::new("http://rpc.local", 0)],
            3,
        ));
        let ledger = Arc::new(FakeLedger {
            landed: Mutex::new(Vec::new()),
        });
        let pipeline = LaunchPipeline::new(Arc::new(relay), pool, ledger, &PipelineConfig::default());

        let err = pipeline
            .launch(
                &handle(),
                vec![vec![sequence("create", 1)], vec![sequence("buy", 2)]],
                Deadline::after(Duration::from_secs(10)),
            )
            .await
            .unwrap_err();

        match &err {
            PipelineError::BundleTimeout { bundle_id, signatures } => {
                assert_eq!(bundle_id.len(), 64);
                assert_eq!(signatures.len(), 2);
            }
            other => panic!("expected bundle timeout, got {other:?}"),
        }
        assert!(err.is_ambiguous());
        assert!(!err.is_retryable());
        send.assert_async().await;
    }
}

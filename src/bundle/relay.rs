//! JSON-RPC client for the bundle relay
//!
//! Relay endpoints are regional and share no rate-limit state, so a 429 from
//! one is answered by backing off and moving to the next in fixed preference
//! order. Any other HTTP or JSON-RPC error means the request itself is bad
//! and fails immediately. A request whose response was lost is resent as is,
//! and the final error remembers that the relay may have seen it.

use super::errors::BundleError;
use super::status::BundleStatusSource;
use super::types::{Bundle, InflightBundleStatus};
use crate::config::{BundleConfig, ConfigError, RelayConfig};
use crate::metrics::metrics;
use crate::retry::{run_with_rotation, RetryError, RetryPolicy};
use crate::types::Deadline;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Path of the bundle JSON-RPC service under a relay base URL
pub const BUNDLES_PATH: &str = "/api/v1/bundles";

const AUTH_HEADER: &str = "x-jito-auth";

#[derive(Debug, Deserialize)]
struct InflightStatuses {
    #[serde(default)]
    value: Option<Vec<InflightBundleStatus>>,
}

#[derive(Debug)]
pub struct BundleRelayClient {
    http: reqwest::Client,
    endpoints: Vec<String>,
    policy: RetryPolicy,
    request_timeout: Duration,
    auth_uuid: Option<String>,
    min_tip_lamports: u64,
    tip_accounts: RwLock<Option<Vec<Pubkey>>>,
}

impl BundleRelayClient {
    /// `endpoints` are relay base URLs in preference order
    pub fn new(
        endpoints: Vec<String>,
        policy: RetryPolicy,
        request_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if endpoints.is_empty() {
            return Err(ConfigError::Validation(
                "relay.endpoints must not be empty".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ConfigError::Validation(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoints: endpoints
                .into_iter()
                .map(|url| url.trim_end_matches('/').to_string())
                .collect(),
            policy,
            request_timeout,
            auth_uuid: None,
            min_tip_lamports: 0,
            tip_accounts: RwLock::new(None),
        })
    }

    pub fn from_config(relay: &RelayConfig, bundle: &BundleConfig) -> Result<Self, ConfigError> {
        relay.validate()?;
        let client = Self::new(
            relay.endpoints.clone(),
            relay.retry_policy(),
            relay.request_timeout(),
        )?
        .with_min_tip(bundle.min_tip_lamports);

        Ok(match &relay.auth_uuid {
            Some(uuid) => client.with_auth(uuid.clone()),
            None => client,
        })
    }

    pub fn with_auth(mut self, uuid: impl Into<String>) -> Self {
        self.auth_uuid = Some(uuid.into());
        self
    }

    pub fn with_min_tip(mut self, lamports: u64) -> Self {
        self.min_tip_lamports = lamports;
        self
    }

    /// Pre-seed the tip account cache
    pub fn with_tip_accounts(self, accounts: Vec<Pubkey>) -> Self {
        *self.tip_accounts.write() = Some(accounts);
        self
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// One JSON-RPC call against one endpoint
    async fn call_once(
        &self,
        endpoint: &str,
        method: &str,
        params: &Value,
        deadline: Deadline,
    ) -> Result<Value, BundleError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let mut request = self
            .http
            .post(format!("{}{}", endpoint, BUNDLES_PATH))
            .timeout(deadline.clamp(self.request_timeout))
            .json(&payload);
        if let Some(uuid) = &self.auth_uuid {
            request = request.header(AUTH_HEADER, uuid);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                BundleError::Transport {
                    endpoint: endpoint.to_string(),
                    message: e.to_string(),
                }
            } else {
                BundleError::ResponseLost {
                    endpoint: endpoint.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            metrics().relay_rate_limited_total.inc();
            warn!(endpoint = %endpoint, method = %method, "Relay rate limited");
            return Err(BundleError::RateLimited {
                endpoint: endpoint.to_string(),
            });
        }

        let body = response.text().await.map_err(|e| BundleError::ResponseLost {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(BundleError::Http {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let mut parsed: Value = serde_json::from_str(&body).map_err(|e| BundleError::Decode {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;

        if let Some(error) = parsed.get("error").filter(|e| !e.is_null()) {
            return Err(BundleError::Rpc {
                endpoint: endpoint.to_string(),
                code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }

        match parsed.get_mut("result") {
            Some(result) => Ok(result.take()),
            None => Err(BundleError::Decode {
                endpoint: endpoint.to_string(),
                message: "response has neither result nor error".to_string(),
            }),
        }
    }

    /// JSON-RPC call rotating across endpoints on rate limiting
    #[instrument(skip(self, params, deadline))]
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        deadline: Deadline,
    ) -> Result<Value, BundleError> {
        let delivery_unknown = AtomicBool::new(false);
        let result = run_with_rotation(&self.policy, self.endpoints.len(), deadline, |ctx| {
            let endpoint = &self.endpoints[ctx.endpoint];
            let params = &params;
            let delivery_unknown = &delivery_unknown;
            async move {
                debug!(endpoint = %endpoint, attempt = ctx.attempt, "Relay call");
                let result = self.call_once(endpoint, method, params, deadline).await;
                if matches!(result, Err(BundleError::ResponseLost { .. })) {
                    delivery_unknown.store(true, Ordering::Relaxed);
                }
                result
            }
        })
        .await;
        let delivery_unknown = delivery_unknown.load(Ordering::Relaxed);

        result.map_err(|err| match err {
            RetryError::Fatal { error, .. } => error,
            RetryError::Exhausted {
                attempts,
                endpoint,
                error,
            } => {
                warn!(method = %method, attempts, error = %error, "Relay attempts exhausted");
                BundleError::SubmissionExhausted {
                    method: method.to_string(),
                    attempts,
                    last_endpoint: self.endpoints[endpoint].clone(),
                    last_status: error.status(),
                    delivery_unknown,
                }
            }
            RetryError::DeadlineExceeded { attempts, .. } => BundleError::DeadlineExceeded {
                method: method.to_string(),
                attempts,
                delivery_unknown,
            },
            RetryError::NoEndpoints => BundleError::NoEndpoints,
        })
    }

    /// Tip accounts advertised by the relay; fetched once per client
    pub async fn get_tip_accounts(&self, deadline: Deadline) -> Result<Vec<Pubkey>, BundleError> {
        if let Some(cached) = self.tip_accounts.read().as_ref() {
            return Ok(cached.clone());
        }

        let result = self.call("getTipAccounts", json!([]), deadline).await?;
        let raw: Vec<String> = serde_json::from_value(result).map_err(|e| BundleError::Decode {
            endpoint: self.endpoints[0].clone(),
            message: format!("getTipAccounts: {}", e),
        })?;

        let accounts = raw
            .iter()
            .map(|s| {
                Pubkey::from_str(s).map_err(|e| BundleError::Decode {
                    endpoint: self.endpoints[0].clone(),
                    message: format!("invalid tip account {}: {}", s, e),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if accounts.is_empty() {
            return Err(BundleError::NoTipAccounts);
        }

        debug!(count = accounts.len(), "Cached relay tip accounts");
        *self.tip_accounts.write() = Some(accounts.clone());
        Ok(accounts)
    }

    /// Random tip account, spreading load across the relay's recipients
    pub async fn random_tip_account(&self, deadline: Deadline) -> Result<Pubkey, BundleError> {
        let accounts = self.get_tip_accounts(deadline).await?;
        accounts
            .get(fastrand::usize(..accounts.len()))
            .copied()
            .ok_or(BundleError::NoTipAccounts)
    }

    /// Submit a validated bundle; returns the relay's bundle id
    #[instrument(skip(self, bundle, deadline), fields(transactions = bundle.len(), tip_lamports = bundle.tip_lamports()))]
    pub async fn send_bundle(&self, bundle: &Bundle, deadline: Deadline) -> Result<String, BundleError> {
        if bundle.tip_lamports() < self.min_tip_lamports {
            return Err(BundleError::TipTooSmall {
                lamports: bundle.tip_lamports(),
                minimum: self.min_tip_lamports,
            });
        }

        let tip_accounts = self.get_tip_accounts(deadline).await?;
        if !tip_accounts.contains(bundle.tip_account()) {
            return Err(BundleError::UnknownTipAccount {
                account: *bundle.tip_account(),
            });
        }

        let encoded = bundle.encode_base64()?;
        let result = self
            .call("sendBundle", json!([encoded, { "encoding": "base64" }]), deadline)
            .await?;

        let bundle_id = result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BundleError::Decode {
                endpoint: self.endpoints[0].clone(),
                message: format!("sendBundle returned {}", result),
            })?;

        metrics().bundles_submitted_total.inc();
        info!(bundle_id = %bundle_id, "Bundle submitted");
        Ok(bundle_id)
    }

    /// Relay's view of one bundle; `None` while the relay does not know it yet
    pub async fn get_inflight_status(
        &self,
        bundle_id: &str,
        deadline: Deadline,
    ) -> Result<Option<InflightBundleStatus>, BundleError> {
        let result = self
            .call("getInflightBundleStatuses", json!([[bundle_id]]), deadline)
            .await?;

        let statuses: InflightStatuses =
            serde_json::from_value(result).map_err(|e| BundleError::Decode {
                endpoint: self.endpoints[0].clone(),
                message: format!("getInflightBundleStatuses: {}", e),
            })?;

        Ok(statuses
            .value
            .unwrap_or_default()
            .into_iter()
            .find(|status| status.bundle_id == bundle_id))
    }
}

#[async_trait]
impl BundleStatusSource for BundleRelayClient {
    async fn inflight_status(
        &self,
        bundle_id: &str,
        deadline: Deadline,
    ) -> Result<Option<InflightBundleStatus>, BundleError> {
        self.get_inflight_status(bundle_id, deadline).await
    }
}

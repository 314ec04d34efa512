use crate::config::ConfigError;
use crate::types::Commitment;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Configuration for an individual ledger RPC endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcEndpointConfig {
    pub url: String,

    /// Lower value is preferred; ties keep configuration order
    #[serde(default)]
    pub priority: u32,
}

impl RpcEndpointConfig {
    pub fn new(url: impl Into<String>, priority: u32) -> Self {
        Self {
            url: url.into(),
            priority,
        }
    }
}

/// `[rpc]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default)]
    pub endpoints: Vec<RpcEndpointConfig>,

    /// Submission attempts spent on one endpoint before moving on
    #[serde(default = "default_attempts_per_endpoint")]
    pub attempts_per_endpoint: u32,

    /// Consecutive failures after which an endpoint is ranked last
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    #[serde(default = "default_preflight_commitment")]
    pub preflight_commitment: Commitment,

    /// Rebroadcast count requested from the node itself
    #[serde(default)]
    pub node_max_retries: Option<usize>,
}

fn default_attempts_per_endpoint() -> u32 {
    3
}

fn default_unhealthy_threshold() -> u64 {
    3
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

fn default_retry_max_delay_ms() -> u64 {
    2000
}

fn default_preflight_commitment() -> Commitment {
    Commitment::Confirmed
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            attempts_per_endpoint: default_attempts_per_endpoint(),
            unhealthy_threshold: default_unhealthy_threshold(),
            request_timeout_ms: default_request_timeout_ms(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            preflight_commitment: default_preflight_commitment(),
            node_max_retries: None,
        }
    }
}

impl RpcConfig {
    /// Endpoints in configuration order, priority taken from position
    pub fn from_urls(urls: &[String]) -> Self {
        Self {
            endpoints: urls
                .iter()
                .enumerate()
                .map(|(index, url)| RpcEndpointConfig::new(url.clone(), index as u32))
                .collect(),
            ..Self::default()
        }
    }

    /// Replace endpoints from a comma-separated list, e.g. `RPC_ENDPOINTS=url1,url2`
    pub fn override_endpoints(&mut self, list: &str) {
        let urls = split_url_list(list);
        if !urls.is_empty() {
            self.endpoints = Self::from_urls(&urls).endpoints;
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::Validation(
                "At least one RPC endpoint must be configured".to_string(),
            ));
        }

        validate_urls("rpc", self.endpoints.iter().map(|e| e.url.as_str()))?;

        if self.attempts_per_endpoint == 0 {
            return Err(ConfigError::Validation(
                "rpc.attempts_per_endpoint must be > 0".to_string(),
            ));
        }
        if self.unhealthy_threshold == 0 {
            return Err(ConfigError::Validation(
                "rpc.unhealthy_threshold must be > 0".to_string(),
            ));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ConfigError::Validation(
                "rpc.retry_base_delay_ms must not exceed rpc.retry_max_delay_ms".to_string(),
            ));
        }

        Ok(())
    }
}

pub(crate) fn split_url_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Reject duplicate and non-http(s) URLs
pub(crate) fn validate_urls<'a>(
    section: &str,
    urls: impl Iterator<Item = &'a str>,
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for url in urls {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "Invalid {} URL format: {}",
                section, url
            )));
        }
        if !seen.insert(url.trim_end_matches('/')) {
            return Err(ConfigError::Validation(format!(
                "Duplicate {} URL: {}",
                section, url
            )));
        }
    }
    Ok(())
}

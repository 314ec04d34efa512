//! Pipeline configuration
//!
//! Loaded from a TOML file; every field has a default so a file only needs
//! the endpoints. `.env` is read first, then `RPC_ENDPOINTS`,
//! `RELAY_ENDPOINTS`, `PREPARER_URL` and `RELAY_AUTH_UUID` override the file.

use crate::retry::RetryPolicy;
use crate::rpc::rpc_config::{split_url_list, validate_urls};
use crate::rpc::RpcConfig;
use crate::types::Commitment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Compute unit ceiling for one transaction
pub const MAX_COMPUTE_UNITS: u32 = 1_400_000;

/// Configuration-related errors
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Main pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub rpc: RpcConfig,

    #[serde(default)]
    pub confirmation: ConfirmationConfig,

    #[serde(default)]
    pub signing: SigningConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub bundle_status: BundleStatusConfig,

    #[serde(default)]
    pub bundle: BundleConfig,

    #[serde(default)]
    pub preparer: PreparerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    #[serde(default = "default_confirmation_poll_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_confirmation_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub commitment: Commitment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigningConfig {
    /// How long a wallet may wait on user approval
    #[serde(default = "default_signing_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay base URLs in fixed preference order
    #[serde(default)]
    pub endpoints: Vec<String>,

    #[serde(default = "default_relay_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_relay_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_relay_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,

    #[serde(default = "default_relay_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Sent as `x-jito-auth` when present
    #[serde(default)]
    pub auth_uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleStatusConfig {
    #[serde(default = "default_bundle_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_bundle_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_bundle_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleConfig {
    #[serde(default = "default_tip_lamports")]
    pub tip_lamports: u64,

    #[serde(default = "default_min_tip_lamports")]
    pub min_tip_lamports: u64,

    /// Compute margin as a percentage of the largest request
    #[serde(default = "default_compute_margin_percent")]
    pub compute_margin_percent: u32,

    /// Lower bound for the compute margin
    #[serde(default = "default_compute_margin_floor")]
    pub compute_margin_floor: u32,

    #[serde(default = "default_max_compute_units")]
    pub max_compute_units: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparerConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_preparer_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

// Default value functions
fn default_confirmation_poll_ms() -> u64 { 500 }
fn default_confirmation_timeout_ms() -> u64 { 60_000 }
fn default_signing_timeout_ms() -> u64 { 120_000 }
fn default_relay_max_attempts() -> u32 { 5 }
fn default_relay_base_backoff_ms() -> u64 { 500 }
fn default_backoff_multiplier() -> f64 { 2.0 }
fn default_relay_max_backoff_ms() -> u64 { 8_000 }
fn default_jitter_factor() -> f64 { 0.1 }
fn default_relay_request_timeout_ms() -> u64 { 5_000 }
fn default_bundle_initial_delay_ms() -> u64 { 5_000 }
fn default_bundle_poll_interval_ms() -> u64 { 3_000 }
fn default_bundle_timeout_ms() -> u64 { 30_000 }
fn default_tip_lamports() -> u64 { 10_000 }
fn default_min_tip_lamports() -> u64 { 1_000 }
fn default_compute_margin_percent() -> u32 { 10 }
fn default_compute_margin_floor() -> u32 { 20_000 }
fn default_max_compute_units() -> u32 { MAX_COMPUTE_UNITS }
fn default_preparer_timeout_ms() -> u64 { 10_000 }
fn default_log_level() -> String { "info".to_string() }

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_confirmation_poll_ms(),
            timeout_ms: default_confirmation_timeout_ms(),
            commitment: Commitment::default(),
        }
    }
}

impl ConfirmationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_signing_timeout_ms(),
        }
    }
}

impl SigningConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            max_attempts: default_relay_max_attempts(),
            base_backoff_ms: default_relay_base_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_relay_max_backoff_ms(),
            jitter_factor: default_jitter_factor(),
            request_timeout_ms: default_relay_request_timeout_ms(),
            auth_uuid: None,
        }
    }
}

impl RelayConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            attempts_per_endpoint: 1,
            base_delay: Duration::from_millis(self.base_backoff_ms),
            multiplier: self.backoff_multiplier,
            max_delay: Duration::from_millis(self.max_backoff_ms),
            jitter_factor: self.jitter_factor,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::Validation(
                "At least one relay endpoint must be configured".to_string(),
            ));
        }
        validate_urls("relay", self.endpoints.iter().map(String::as_str))?;

        if self.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "relay.max_attempts must be > 0".to_string(),
            ));
        }
        if !(self.backoff_multiplier > 1.0) {
            return Err(ConfigError::Validation(
                "relay.backoff_multiplier must be > 1.0".to_string(),
            ));
        }
        let max_jitter = RetryPolicy::max_monotonic_jitter(self.backoff_multiplier);
        if !(0.0..max_jitter).contains(&self.jitter_factor) {
            return Err(ConfigError::Validation(format!(
                "relay.jitter_factor must be in [0, {:.3}) for multiplier {}",
                max_jitter, self.backoff_multiplier
            )));
        }
        if self.base_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::Validation(
                "relay.base_backoff_ms must not exceed relay.max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for BundleStatusConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_bundle_initial_delay_ms(),
            poll_interval_ms: default_bundle_poll_interval_ms(),
            timeout_ms: default_bundle_timeout_ms(),
        }
    }
}

impl BundleStatusConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            tip_lamports: default_tip_lamports(),
            min_tip_lamports: default_min_tip_lamports(),
            compute_margin_percent: default_compute_margin_percent(),
            compute_margin_floor: default_compute_margin_floor(),
            max_compute_units: default_max_compute_units(),
        }
    }
}

impl Default for PreparerConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_preparer_timeout_ms(),
        }
    }
}

impl PreparerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Io(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(format!("Failed to parse TOML: {}", e)))
    }

    /// File (or defaults when it does not exist), then `.env`, then overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::from_toml_file(path)?
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(list) = std::env::var("RPC_ENDPOINTS") {
            self.rpc.override_endpoints(&list);
        }
        if let Ok(list) = std::env::var("RELAY_ENDPOINTS") {
            let urls = split_url_list(&list);
            if !urls.is_empty() {
                self.relay.endpoints = urls;
            }
        }
        if let Ok(url) = std::env::var("PREPARER_URL") {
            if !url.trim().is_empty() {
                self.preparer.url = Some(url.trim().to_string());
            }
        }
        if let Ok(uuid) = std::env::var("RELAY_AUTH_UUID") {
            if !uuid.trim().is_empty() {
                self.relay.auth_uuid = Some(uuid.trim().to_string());
            }
        }
    }

    /// Validate configuration.
    ///
    /// Relay settings are only checked when relay endpoints are present; the
    /// bundle client validates them again on construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rpc.validate()?;

        if !self.relay.endpoints.is_empty() {
            self.relay.validate()?;
        }

        if self.confirmation.poll_interval_ms == 0
            || self.confirmation.poll_interval_ms > self.confirmation.timeout_ms
        {
            return Err(ConfigError::Validation(
                "confirmation.poll_interval_ms must be in (0, timeout_ms]".to_string(),
            ));
        }

        let status = &self.bundle_status;
        if status.poll_interval_ms == 0 || status.poll_interval_ms > status.timeout_ms {
            return Err(ConfigError::Validation(
                "bundle_status.poll_interval_ms must be in (0, timeout_ms]".to_string(),
            ));
        }
        if status.initial_delay_ms > status.timeout_ms {
            return Err(ConfigError::Validation(
                "bundle_status.initial_delay_ms must not exceed timeout_ms".to_string(),
            ));
        }

        if self.signing.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "signing.timeout_ms must be > 0".to_string(),
            ));
        }

        let bundle = &self.bundle;
        if bundle.min_tip_lamports == 0 || bundle.tip_lamports < bundle.min_tip_lamports {
            return Err(ConfigError::Validation(format!(
                "bundle.tip_lamports ({}) must be >= min_tip_lamports ({}) > 0",
                bundle.tip_lamports, bundle.min_tip_lamports
            )));
        }
        if bundle.max_compute_units == 0 || bundle.max_compute_units > MAX_COMPUTE_UNITS {
            return Err(ConfigError::Validation(format!(
                "bundle.max_compute_units must be in (0, {}]",
                MAX_COMPUTE_UNITS
            )));
        }

        if let Some(url) = &self.preparer.url {
            validate_urls("preparer", std::iter::once(url.as_str()))?;
        }

        Ok(())
    }
}

//! HTTP client for the transaction preparer
//!
//! The preparer builds the instructions and returns an unsigned, serialized
//! transaction plus metadata. Nothing here interprets the instructions.

use crate::errors::PreparationError;
use crate::types::{EnvelopeMetadata, UnsignedTransactionEnvelope};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const PREPARE_PATH: &str = "/prepare";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrepareResponse {
    serialized_transaction: String,
    metadata: EnvelopeMetadata,
}

#[derive(Debug, Clone)]
pub struct PreparerClient {
    http: reqwest::Client,
    base_url: String,
}

impl PreparerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PreparationError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PreparationError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask the preparer for an unsigned transaction.
    ///
    /// The payload is decoded eagerly so a malformed response fails here and
    /// not halfway through signing.
    #[instrument(skip(self, request), fields(base_url = %self.base_url))]
    pub async fn prepare(&self, request: &Value) -> Result<UnsignedTransactionEnvelope, PreparationError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, PREPARE_PATH))
            .json(request)
            .send()
            .await
            .map_err(|e| PreparationError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PreparationError::Transport(e.to_string()))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Preparer rejected request");
            return Err(PreparationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: PrepareResponse = serde_json::from_str(&body)
            .map_err(|e| PreparationError::Decode(format!("invalid preparer response: {}", e)))?;

        let envelope =
            UnsignedTransactionEnvelope::from_base64(&parsed.serialized_transaction, parsed.metadata)?;
        // Validate now; the envelope itself stays opaque for the pipeline
        envelope.clone().into_transaction()?;

        debug!(
            bytes = envelope.len(),
            network = envelope.metadata().network.as_str(),
            "Prepared transaction received"
        );
        Ok(envelope)
    }
}

use crate::retry::Retryable;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

/// Bundle validation and relay communication failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BundleError {
    #[error("Invalid bundle: {0}")]
    InvalidBundle(String),

    /// The tip is missing, misplaced or paid more than once
    #[error("Tip placement violated: {0}")]
    TipPlacement(String),

    #[error("Tip account {account} is not advertised by the relay")]
    UnknownTipAccount { account: Pubkey },

    #[error("Tip of {lamports} lamports is below the minimum of {minimum}")]
    TipTooSmall { lamports: u64, minimum: u64 },

    /// HTTP 429; transient
    #[error("Relay {endpoint} rate limited the request")]
    RateLimited { endpoint: String },

    /// The connection could not be established; the request never left
    #[error("Relay {endpoint} unreachable: {message}")]
    Transport { endpoint: String, message: String },

    /// The request was sent but no complete response came back
    #[error("Relay {endpoint} response lost: {message}")]
    ResponseLost { endpoint: String, message: String },

    #[error("Relay {endpoint} returned HTTP {status}: {body}")]
    Http {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// JSON-RPC error object; the relay understood and refused the request
    #[error("Relay {endpoint} error {code}: {message}")]
    Rpc {
        endpoint: String,
        code: i64,
        message: String,
    },

    #[error("Unexpected response from relay {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    /// `delivery_unknown` is set when any attempt lost its response
    #[error("{method} exhausted after {attempts} attempts (last endpoint {last_endpoint}, last status {last_status:?})")]
    SubmissionExhausted {
        method: String,
        attempts: u32,
        last_endpoint: String,
        last_status: Option<u16>,
        delivery_unknown: bool,
    },

    #[error("{method} deadline reached after {attempts} attempts")]
    DeadlineExceeded {
        method: String,
        attempts: u32,
        delivery_unknown: bool,
    },

    #[error("No relay endpoints configured")]
    NoEndpoints,

    #[error("Relay advertised no tip accounts")]
    NoTipAccounts,
}

impl BundleError {
    /// Whether a fresh attempt against the relay could succeed. Never true
    /// once a request may have been processed.
    pub fn is_retryable(&self) -> bool {
        match self {
            BundleError::RateLimited { .. } | BundleError::Transport { .. } => true,
            BundleError::SubmissionExhausted {
                delivery_unknown, ..
            }
            | BundleError::DeadlineExceeded {
                delivery_unknown, ..
            } => !delivery_unknown,
            _ => false,
        }
    }

    /// Whether the relay may have processed the request despite the error
    pub fn may_have_been_accepted(&self) -> bool {
        match self {
            BundleError::ResponseLost { .. } | BundleError::Decode { .. } => true,
            BundleError::Http { status, .. } => *status >= 500,
            BundleError::SubmissionExhausted {
                delivery_unknown, ..
            }
            | BundleError::DeadlineExceeded {
                delivery_unknown, ..
            } => *delivery_unknown,
            _ => false,
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            BundleError::RateLimited { .. } => Some(429),
            BundleError::Http { status, .. } => Some(*status),
            BundleError::SubmissionExhausted { last_status, .. } => *last_status,
            _ => None,
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        match self {
            BundleError::RateLimited { endpoint }
            | BundleError::Transport { endpoint, .. }
            | BundleError::ResponseLost { endpoint, .. }
            | BundleError::Http { endpoint, .. }
            | BundleError::Rpc { endpoint, .. }
            | BundleError::Decode { endpoint, .. } => Some(endpoint),
            BundleError::SubmissionExhausted { last_endpoint, .. } => Some(last_endpoint),
            _ => None,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            BundleError::InvalidBundle(_) => "invalid_bundle",
            BundleError::TipPlacement(_) => "tip_placement",
            BundleError::UnknownTipAccount { .. } => "unknown_tip_account",
            BundleError::TipTooSmall { .. } => "tip_too_small",
            BundleError::RateLimited { .. } => "rate_limited",
            BundleError::Transport { .. } => "transport",
            BundleError::ResponseLost { .. } => "response_lost",
            BundleError::Http { .. } => "http",
            BundleError::Rpc { .. } => "rpc",
            BundleError::Decode { .. } => "decode",
            BundleError::SubmissionExhausted { .. } => "exhausted",
            BundleError::DeadlineExceeded { .. } => "deadline",
            BundleError::NoEndpoints => "no_endpoints",
            BundleError::NoTipAccounts => "no_tip_accounts",
        }
    }
}

/// Only a single relay call is retried in place; exhaustion is final for the loop.
/// Resending after a lost response repeats identical bytes, which the relay
/// deduplicates.
impl Retryable for BundleError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            BundleError::RateLimited { .. }
                | BundleError::Transport { .. }
                | BundleError::ResponseLost { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_rate_limit_and_transport_retry_in_loop() {
        let rate_limited = BundleError::RateLimited {
            endpoint: "https://ny.relay.example".to_string(),
        };
        assert!(Retryable::is_retryable(&rate_limited));
        assert_eq!(rate_limited.status(), Some(429));

        let http = BundleError::Http {
            endpoint: "https://ny.relay.example".to_string(),
            status: 400,
            body: "bundle contains duplicate transactions".to_string(),
        };
        assert!(!Retryable::is_retryable(&http));
        assert!(!http.is_retryable());
        assert_eq!(http.category(), "http");

        let exhausted = BundleError::SubmissionExhausted {
            method: "sendBundle".to_string(),
            attempts: 5,
            last_endpoint: "https://ams.relay.example".to_string(),
            last_status: Some(429),
            delivery_unknown: false,
        };
        assert!(!Retryable::is_retryable(&exhausted));
        assert!(exhausted.is_retryable());
        assert!(!exhausted.may_have_been_accepted());
        assert_eq!(exhausted.endpoint(), Some("https://ams.relay.example"));
    }

    #[test]
    fn test_lost_responses_are_not_retryable_flows() {
        let lost = BundleError::ResponseLost {
            endpoint: "https://ny.relay.example".to_string(),
            message: "operation timed out".to_string(),
        };
        assert!(Retryable::is_retryable(&lost));
        assert!(!lost.is_retryable());
        assert!(lost.may_have_been_accepted());

        let exhausted = BundleError::SubmissionExhausted {
            method: "sendBundle".to_string(),
            attempts: 5,
            last_endpoint: "https://ny.relay.example".to_string(),
            last_status: Some(429),
            delivery_unknown: true,
        };
        assert!(!exhausted.is_retryable());
        assert!(exhausted.may_have_been_accepted());

        let refused = BundleError::Rpc {
            endpoint: "https://ny.relay.example".to_string(),
            code: -32602,
            message: "bundle contains an expired blockhash".to_string(),
        };
        assert!(!refused.may_have_been_accepted());
    }
}

use crate::retry::Retryable;
use solana_client::client_error::ClientError;
use thiserror::Error;

/// Errors returned by a single ledger RPC call
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    /// Transport-level errors (network, connection)
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    #[error("Timeout after {timeout_ms}ms (endpoint: {endpoint})")]
    Timeout { endpoint: String, timeout_ms: u64 },

    #[error("Rate limit exceeded (endpoint: {endpoint})")]
    RateLimitExceeded { endpoint: String },

    #[error("Blockhash not found (endpoint: {endpoint})")]
    BlockhashNotFound { endpoint: String },

    /// Preflight simulation rejected the transaction for a state-dependent reason
    #[error("Preflight simulation failed: {message} (endpoint: {endpoint})")]
    PreflightFailed { endpoint: String, message: String },

    /// The ledger already holds a transaction with this signature
    #[error("Transaction already processed (endpoint: {endpoint})")]
    AlreadyProcessed { endpoint: String },

    #[error("Insufficient funds: {message} (endpoint: {endpoint})")]
    InsufficientFunds { endpoint: String, message: String },

    /// Signature verification, sanitization or decoding failure
    #[error("Invalid transaction: {message} (endpoint: {endpoint})")]
    InvalidTransaction { endpoint: String, message: String },

    /// RPC response errors (from the RPC server)
    #[error("RPC response error: {message} (endpoint: {endpoint}, code: {code:?})")]
    RpcResponse {
        endpoint: String,
        message: String,
        code: Option<i64>,
    },
}

impl RpcError {
    /// Whether the same signed bytes could be accepted on another try
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::Transport { .. } => true,
            RpcError::Timeout { .. } => true,
            RpcError::RateLimitExceeded { .. } => true,
            RpcError::BlockhashNotFound { .. } => true,
            RpcError::PreflightFailed { .. } => true,
            RpcError::RpcResponse { .. } => true,

            // Resending identical bytes cannot change these
            RpcError::AlreadyProcessed { .. } => false,
            RpcError::InsufficientFunds { .. } => false,
            RpcError::InvalidTransaction { .. } => false,
        }
    }

    /// Whether the endpoint itself misbehaved, as opposed to the transaction
    pub fn counts_against_endpoint(&self) -> bool {
        matches!(
            self,
            RpcError::Transport { .. }
                | RpcError::Timeout { .. }
                | RpcError::RateLimitExceeded { .. }
                | RpcError::RpcResponse { .. }
        )
    }

    /// Whether the node may have received and forwarded the bytes despite the
    /// error. A refused connection or failed DNS lookup never reached it.
    pub fn may_have_delivered(&self) -> bool {
        match self {
            RpcError::Timeout { .. } => true,
            RpcError::Transport { message, .. } => {
                let message = message.to_lowercase();
                !(message.contains("connection refused") || message.contains("dns error"))
            }
            _ => false,
        }
    }

    pub fn endpoint(&self) -> &str {
        match self {
            RpcError::Transport { endpoint, .. }
            | RpcError::Timeout { endpoint, .. }
            | RpcError::RateLimitExceeded { endpoint }
            | RpcError::BlockhashNotFound { endpoint }
            | RpcError::PreflightFailed { endpoint, .. }
            | RpcError::AlreadyProcessed { endpoint }
            | RpcError::InsufficientFunds { endpoint, .. }
            | RpcError::InvalidTransaction { endpoint, .. }
            | RpcError::RpcResponse { endpoint, .. } => endpoint,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            RpcError::Transport { .. } => "transport",
            RpcError::Timeout { .. } => "timeout",
            RpcError::RateLimitExceeded { .. } => "rate_limited",
            RpcError::BlockhashNotFound { .. } => "blockhash_not_found",
            RpcError::PreflightFailed { .. } => "preflight",
            RpcError::AlreadyProcessed { .. } => "already_processed",
            RpcError::InsufficientFunds { .. } => "insufficient_funds",
            RpcError::InvalidTransaction { .. } => "invalid_transaction",
            RpcError::RpcResponse { .. } => "rpc_response",
        }
    }

    pub fn from_client_error(err: ClientError, endpoint: &str) -> Self {
        Self::classify(&err.to_string(), endpoint, None)
    }

    /// Classify an error message reported by an RPC node.
    ///
    /// Order matters: a simulation failure message embeds the underlying
    /// reason, so specific reasons are checked before the generic ones.
    pub fn classify(message: &str, endpoint: &str, timeout_ms: Option<u64>) -> Self {
        let err_str = message.to_lowercase();
        let endpoint = endpoint.to_string();

        if err_str.contains("already been processed") || err_str.contains("alreadyprocessed") {
            RpcError::AlreadyProcessed { endpoint }
        } else if err_str.contains("blockhash not found") || err_str.contains("blockhashnotfound") {
            RpcError::BlockhashNotFound { endpoint }
        } else if err_str.contains("insufficient funds")
            || err_str.contains("insufficient lamports")
            || err_str.contains("insufficientfundsforfee")
            || err_str.contains("no record of a prior credit")
        {
            RpcError::InsufficientFunds {
                endpoint,
                message: message.to_string(),
            }
        } else if err_str.contains("signature verification")
            || err_str.contains("signaturefailure")
            || err_str.contains("failed to deserialize")
            || err_str.contains("failed to decode")
            || err_str.contains("sanitize")
            || err_str.contains("too large")
            || err_str.contains("invalid transaction")
        {
            RpcError::InvalidTransaction {
                endpoint,
                message: message.to_string(),
            }
        } else if err_str.contains("rate limit")
            || err_str.contains("too many requests")
            || err_str.contains("429")
        {
            RpcError::RateLimitExceeded { endpoint }
        } else if err_str.contains("timeout") || err_str.contains("timed out") {
            RpcError::Timeout {
                endpoint,
                timeout_ms: timeout_ms.unwrap_or(0),
            }
        } else if err_str.contains("simulation failed") {
            RpcError::PreflightFailed {
                endpoint,
                message: message.to_string(),
            }
        } else if err_str.contains("error sending request")
            || err_str.contains("connection")
            || err_str.contains("dns error")
        {
            RpcError::Transport {
                endpoint,
                message: message.to_string(),
            }
        } else {
            let code = err_str
                .split("code:")
                .nth(1)
                .and_then(|s| s.split_whitespace().next())
                .and_then(|s| s.trim_end_matches(',').parse::<i64>().ok());

            RpcError::RpcResponse {
                endpoint,
                message: message.to_string(),
                code,
            }
        }
    }
}

impl Retryable for RpcError {
    fn is_retryable(&self) -> bool {
        RpcError::is_retryable(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EP: &str = "https://rpc.test";

    #[test]
    fn test_permanent_preflight_rejections() {
        let cases = [
            "Transaction simulation failed: Attempt to debit an account but found no record of a prior credit.",
            "Transaction simulation failed: Error processing Instruction 0: insufficient lamports 10, need 20",
            "RPC response error -32003: Transaction signature verification failure",
            "failed to deserialize solana_sdk::transaction::versioned::VersionedTransaction: io error",
        ];
        for message in cases {
            let err = RpcError::classify(message, EP, None);
            assert!(!err.is_retryable(), "{} should be permanent: {:?}", message, err);
        }
    }

    #[test]
    fn test_transient_errors() {
        let cases = [
            "Transaction simulation failed: Blockhash not found",
            "HTTP status client error (429 Too Many Requests)",
            "error sending request for url (https://rpc.test/): connection refused",
            "operation timed out",
            "Transaction simulation failed: Error processing Instruction 2: custom program error: 0x1771",
        ];
        for message in cases {
            let err = RpcError::classify(message, EP, Some(5000));
            assert!(err.is_retryable(), "{} should be transient: {:?}", message, err);
            assert_eq!(err.endpoint(), EP);
        }
    }

    #[test]
    fn test_specific_classification() {
        assert!(matches!(
            RpcError::classify("This transaction has already been processed", EP, None),
            RpcError::AlreadyProcessed { .. }
        ));
        assert!(matches!(
            RpcError::classify("Transaction simulation failed: custom program error: 0x1", EP, None),
            RpcError::PreflightFailed { .. }
        ));
        assert_eq!(
            RpcError::classify("timed out", EP, Some(750)),
            RpcError::Timeout {
                endpoint: EP.to_string(),
                timeout_ms: 750
            }
        );

        match RpcError::classify("server error code: -32005 node is behind", EP, None) {
            RpcError::RpcResponse { code, .. } => assert_eq!(code, Some(-32005)),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_delivery_ambiguity() {
        assert!(RpcError::classify("operation timed out", EP, None).may_have_delivered());
        assert!(RpcError::classify("connection reset by peer", EP, None).may_have_delivered());
        assert!(!RpcError::classify(
            "error sending request for url (https://rpc.test/): connection refused",
            EP,
            None
        )
        .may_have_delivered());
        assert!(!RpcError::classify("Transaction simulation failed: Blockhash not found", EP, None)
            .may_have_delivered());
    }

    #[test]
    fn test_endpoint_blame() {
        assert!(RpcError::RateLimitExceeded {
            endpoint: EP.to_string()
        }
        .counts_against_endpoint());
        assert!(!RpcError::InsufficientFunds {
            endpoint: EP.to_string(),
            message: String::new()
        }
        .counts_against_endpoint());
    }
}

use solana_client::client_error::{ClientError, ClientErrorKind};
use thiserror::Error;

/// Errors surfaced by the RPC gateway
#[derive(Debug, Clone, Error)]
pub enum RpcManagerError {
    /// Transport-level errors (connection refused, reset, DNS)
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    /// Timeout errors
    #[error("Timeout after {timeout_ms}ms (endpoint: {endpoint})")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// RPC response errors (from the RPC server)
    #[error("RPC response error: {message} (endpoint: {endpoint}, code: {code:?})")]
    RpcResponse {
        endpoint: String,
        message: String,
        code: Option<i64>,
    },

    /// Rate limit exceeded
    #[error("Rate limit exceeded (endpoint: {endpoint})")]
    RateLimitExceeded { endpoint: String },

    #[error("Blockhash not found (endpoint: {endpoint})")]
    BlockhashNotFound { endpoint: String },

    #[error("Transaction expired (endpoint: {endpoint})")]
    TransactionExpired { endpoint: String },

    #[error("Insufficient funds (endpoint: {endpoint})")]
    InsufficientFunds { endpoint: String },

    /// The node answered but the payload could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RpcManagerError {
    /// Connection-class failures: the request may never have reached the node
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RpcManagerError::Transport { .. } | RpcManagerError::Timeout { .. }
        )
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcManagerError::Transport { .. }
            | RpcManagerError::Timeout { .. }
            | RpcManagerError::RateLimitExceeded { .. }
            | RpcManagerError::BlockhashNotFound { .. } => true,
            RpcManagerError::RpcResponse { code, .. } => {
                matches!(code, Some(c) if (500..600).contains(c))
            }
            RpcManagerError::TransactionExpired { .. }
            | RpcManagerError::InsufficientFunds { .. }
            | RpcManagerError::InvalidResponse(_)
            | RpcManagerError::Internal(_) => false,
        }
    }

    /// Get the endpoint associated with this error, if any
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            RpcManagerError::Transport { endpoint, .. }
            | RpcManagerError::Timeout { endpoint, .. }
            | RpcManagerError::RpcResponse { endpoint, .. }
            | RpcManagerError::RateLimitExceeded { endpoint }
            | RpcManagerError::BlockhashNotFound { endpoint }
            | RpcManagerError::TransactionExpired { endpoint }
            | RpcManagerError::InsufficientFunds { endpoint } => Some(endpoint),
            _ => None,
        }
    }

    /// Create from ClientError with context
    pub fn from_client_error(err: ClientError, endpoint: &str, timeout_ms: u64) -> Self {
        let endpoint = endpoint.to_string();

        // Structural classification first, the message text only as a fallback
        match err.kind() {
            ClientErrorKind::Reqwest(e) if e.is_timeout() => {
                return RpcManagerError::Timeout {
                    endpoint,
                    timeout_ms,
                };
            }
            ClientErrorKind::Reqwest(e) if e.is_connect() => {
                return RpcManagerError::Transport {
                    endpoint,
                    message: e.to_string(),
                };
            }
            ClientErrorKind::Io(e) => {
                return RpcManagerError::Transport {
                    endpoint,
                    message: e.to_string(),
                };
            }
            _ => {}
        }

        let err_str = err.to_string().to_lowercase();
        if err_str.contains("blockhash not found") {
            RpcManagerError::BlockhashNotFound { endpoint }
        } else if err_str.contains("transaction expired") || err_str.contains("block height exceeded")
        {
            RpcManagerError::TransactionExpired { endpoint }
        } else if err_str.contains("insufficient funds") || err_str.contains("insufficient lamports")
        {
            RpcManagerError::InsufficientFunds { endpoint }
        } else if err_str.contains("rate limit")
            || err_str.contains("too many requests")
            || err_str.contains("429")
        {
            RpcManagerError::RateLimitExceeded { endpoint }
        } else if err_str.contains("timeout") || err_str.contains("timed out") {
            RpcManagerError::Timeout {
                endpoint,
                timeout_ms,
            }
        } else if err_str.contains("connection refused")
            || err_str.contains("connection reset")
            || err_str.contains("error trying to connect")
        {
            RpcManagerError::Transport {
                endpoint,
                message: err.to_string(),
            }
        } else {
            let code = err_str
                .split("code:")
                .nth(1)
                .and_then(|s| s.split_whitespace().next())
                .and_then(|s| s.trim_matches(|c: char| !c.is_ascii_digit() && c != '-').parse::<i64>().ok());

            RpcManagerError::RpcResponse {
                endpoint,
                message: err.to_string(),
                code,
            }
        }
    }
}

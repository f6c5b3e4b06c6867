//! Error types for transaction submission
//!
//! Only transport failures are transient. Everything else means the transaction
//! reached a relay or node and was refused, or the reply could not be read, and
//! resubmitting the same bytes would not help.

use std::fmt;
use thiserror::Error;

use super::SenderKind;
use crate::rpc_manager::RpcManagerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Timeout,
    Connect,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Timeout => write!(f, "timeout"),
            TransportKind::Connect => write!(f, "connect"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("Transport error ({kind}): {message}")]
    Transport { kind: TransportKind, message: String },

    /// The relay or node answered and refused the transaction
    #[error("Rejected by {sender}: {reason}")]
    Rejected { sender: SenderKind, reason: String },

    #[error("Sender {0} does not support simulation")]
    Unsupported(SenderKind),

    #[error("Sender {0} is not configured")]
    NotConfigured(SenderKind),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("RPC error: {0}")]
    Rpc(RpcManagerError),

    #[error("Failed to encode transaction: {0}")]
    Encode(String),
}

impl SendError {
    /// Worth another attempt with the same transaction
    pub fn is_transient(&self) -> bool {
        matches!(self, SendError::Transport { .. })
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        SendError::Transport {
            kind: TransportKind::Timeout,
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        SendError::Transport {
            kind: TransportKind::Connect,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for SendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SendError::timeout(err.to_string())
        } else if err.is_connect() {
            SendError::connect(err.to_string())
        } else if let Some(status) = err.status() {
            SendError::Http {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            SendError::InvalidResponse(err.to_string())
        }
    }
}

impl From<RpcManagerError> for SendError {
    fn from(err: RpcManagerError) -> Self {
        match err {
            RpcManagerError::Timeout { .. } => SendError::timeout(err.to_string()),
            RpcManagerError::Transport { .. } => SendError::connect(err.to_string()),
            other => SendError::Rpc(other),
        }
    }
}

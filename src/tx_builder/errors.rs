//! Error types for transaction building
//!
//! Validation variants describe intents that can never be built and are fatal
//! to that intent alone. The rest describe collaborators (quote services, the
//! RPC node, the keyring) that failed while building a valid intent.

use thiserror::Error;

use crate::rpc_manager::RpcManagerError;
use crate::types::SwapInType;

use super::BuilderKind;

#[derive(Error, Debug)]
pub enum BuildError {
    /// Direction is neither buy nor sell
    #[error("Invalid swap direction")]
    InvalidDirection,

    /// A sell must say whether `amount` is a percentage or a quantity
    #[error("Sell intent is missing in_type")]
    MissingInType,

    /// The strategy has no implementation for this input type
    #[error("Strategy {strategy} does not support in_type {in_type}")]
    UnsupportedInType {
        strategy: BuilderKind,
        in_type: SwapInType,
    },

    /// Decimals for the mint could not be resolved
    #[error("Token metadata missing for mint {mint}")]
    TokenMetadataMissing { mint: String },

    /// Priority relay requested without a fee bid
    #[error("Priority relay requested without a priority fee")]
    MissingPriorityFee,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid {field} address: {value}")]
    InvalidMint { field: &'static str, value: String },

    /// No keypair held for the intent's user
    #[error("No signer available for {0}")]
    UnknownSigner(String),

    /// The intent asked for a strategy this process was not configured with
    #[error("Strategy {0} is not configured")]
    StrategyUnavailable(BuilderKind),

    /// No pool registered for the mint
    #[error("No pool registered for mint {0}")]
    PoolNotFound(String),

    /// Percentage sell against an empty or missing token account
    #[error("No token balance for mint {0}")]
    NoTokenBalance(String),

    /// Quote, swap or order service failed
    #[error("Quote service error ({service}): {reason}")]
    QuoteService {
        service: &'static str,
        reason: String,
    },

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcManagerError),

    /// Failed to sign the transaction
    #[error("Signing failed: {0}")]
    Signing(String),

    /// A service returned bytes that are not a usable transaction
    #[error("Invalid transaction payload: {0}")]
    InvalidTransaction(String),

    /// Failed to build an instruction for a specific program
    #[error("Instruction build error (program={program}): {reason}")]
    Instruction { program: String, reason: String },
}

impl BuildError {
    /// Malformed or unbuildable intent, as opposed to a collaborator failure
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidDirection
                | Self::MissingInType
                | Self::UnsupportedInType { .. }
                | Self::TokenMetadataMissing { .. }
                | Self::MissingPriorityFee
                | Self::InvalidAmount(_)
                | Self::InvalidMint { .. }
                | Self::UnknownSigner(_)
                | Self::StrategyUnavailable(_)
                | Self::PoolNotFound(_)
                | Self::NoTokenBalance(_)
        )
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidDirection
            | Self::MissingInType
            | Self::UnsupportedInType { .. }
            | Self::MissingPriorityFee
            | Self::InvalidAmount(_)
            | Self::InvalidMint { .. } => "validation",
            Self::TokenMetadataMissing { .. } => "token_metadata",
            Self::UnknownSigner(_) | Self::Signing(_) => "signing",
            Self::StrategyUnavailable(_) => "config",
            Self::PoolNotFound(_) | Self::NoTokenBalance(_) => "state",
            Self::QuoteService { .. } => "quote",
            Self::Rpc(_) => "rpc",
            Self::InvalidTransaction(_) => "payload",
            Self::Instruction { .. } => "instruction",
        }
    }

    pub fn quote(service: &'static str, reason: impl Into<String>) -> Self {
        Self::QuoteService {
            service,
            reason: reason.into(),
        }
    }

    /// Create an instruction build error for a specific program
    pub fn instruction_failed(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Instruction {
            program: program.into(),
            reason: reason.into(),
        }
    }
}

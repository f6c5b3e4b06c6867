//! Signed transaction handed from a builder to a sender

use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Signature, transaction::VersionedTransaction};

use super::routing::SwapRoute;
use super::BuilderKind;
use crate::compat;

/// A signed transaction plus what it was built against.
///
/// Owned by the pipeline run that built it.
#[derive(Debug, Clone)]
pub struct BuiltTransaction {
    pub transaction: VersionedTransaction,
    /// Blockhash embedded in the message
    pub blockhash: Hash,
    /// Known when the blockhash came from our cache or the service reported it
    pub last_valid_block_height: Option<u64>,
    pub route: SwapRoute,
    pub strategy: BuilderKind,
}

impl BuiltTransaction {
    pub fn new(
        transaction: VersionedTransaction,
        last_valid_block_height: Option<u64>,
        route: SwapRoute,
        strategy: BuilderKind,
    ) -> Self {
        let blockhash = compat::get_recent_blockhash(&transaction.message);
        Self {
            transaction,
            blockhash,
            last_valid_block_height,
            route,
            strategy,
        }
    }

    /// Fee payer signature, known before submission
    pub fn signature(&self) -> Option<Signature> {
        compat::first_signature(&self.transaction)
    }

    pub fn required_signers(&self) -> Vec<Pubkey> {
        compat::get_required_signers(&self.transaction.message).to_vec()
    }
}

//! RPC Manager Module
//!
//! The network surface the pipeline consumes, behind a trait so every component
//! takes an explicit handle and tests can substitute a fake node.

use async_trait::async_trait;
use solana_sdk::{
    commitment_config::CommitmentLevel, hash::Hash, pubkey::Pubkey, signature::Signature,
    transaction::VersionedTransaction,
};

pub mod rpc_errors;
pub mod solana_rpc;

pub use rpc_errors::RpcManagerError;
pub use solana_rpc::SolanaRpcGateway;

/// Owner, balance and raw data of an on-chain account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub owner: Pubkey,
    pub lamports: u64,
    pub data: Vec<u8>,
}

/// Outcome of a preflight simulation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationOutcome {
    pub err: Option<String>,
    pub logs: Vec<String>,
    pub units_consumed: Option<u64>,
}

/// Status of a signature as reported by `getSignatureStatuses`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureState {
    pub slot: u64,
    pub err: Option<String>,
    /// Whether the requested commitment level has been reached
    pub commitment_reached: bool,
}

/// Token balance row from transaction meta
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalanceEntry {
    pub owner: Option<String>,
    pub mint: String,
    pub amount: u128,
}

/// Balance movements of a landed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionBalances {
    pub slot: u64,
    pub fee: u64,
    /// Lamport balances of the static account keys; index 0 is the fee payer
    pub pre_balances: Vec<u64>,
    pub post_balances: Vec<u64>,
    pub pre_token_balances: Vec<TokenBalanceEntry>,
    pub post_token_balances: Vec<TokenBalanceEntry>,
}

impl TransactionBalances {
    /// Lamport change of the fee payer, fee included
    pub fn fee_payer_delta(&self) -> Option<i64> {
        let pre = *self.pre_balances.first()?;
        let post = *self.post_balances.first()?;
        Some(post as i64 - pre as i64)
    }

    /// Raw token change of `owner` in `mint`
    pub fn token_delta(&self, owner: &str, mint: &str) -> i128 {
        let sum = |entries: &[TokenBalanceEntry]| -> i128 {
            entries
                .iter()
                .filter(|e| e.mint == mint && e.owner.as_deref() == Some(owner))
                .map(|e| e.amount as i128)
                .sum()
        };
        sum(&self.post_token_balances) - sum(&self.pre_token_balances)
    }
}

/// Network RPC surface consumed by caches, builders, senders and settlement
#[async_trait]
pub trait RpcGateway: Send + Sync {
    /// Endpoint label used in logs
    fn endpoint(&self) -> &str;

    async fn get_latest_blockhash(&self) -> Result<(Hash, u64), RpcManagerError>;

    /// `Ok(None)` when the account does not exist
    async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<AccountSnapshot>, RpcManagerError>;

    /// Raw amount held by a token account, `Ok(None)` when the account does not exist
    async fn get_token_account_balance(&self, pubkey: &Pubkey) -> Result<Option<u64>, RpcManagerError>;

    async fn get_minimum_balance_for_rent_exemption(&self, data_len: usize) -> Result<u64, RpcManagerError>;

    async fn simulate_transaction(
        &self,
        tx: &VersionedTransaction,
    ) -> Result<SimulationOutcome, RpcManagerError>;

    async fn send_transaction(
        &self,
        tx: &VersionedTransaction,
        skip_preflight: bool,
    ) -> Result<Signature, RpcManagerError>;

    async fn get_signature_status(
        &self,
        signature: &Signature,
        commitment: CommitmentLevel,
    ) -> Result<Option<SignatureState>, RpcManagerError>;

    /// `Ok(None)` while the transaction is not yet visible
    async fn get_transaction_balances(
        &self,
        signature: &Signature,
        commitment: CommitmentLevel,
    ) -> Result<Option<TransactionBalances>, RpcManagerError>;
}

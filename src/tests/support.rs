//! Shared test fixtures
//!
//! `FakeRpc` stands in for a node: accounts and balances are seeded by the
//! test, sends and status polls follow a script, and every call is counted.

use async_trait::async_trait;
use parking_lot::Mutex;
use solana_sdk::{
    commitment_config::CommitmentLevel,
    hash::Hash,
    message::{v0, VersionedMessage},
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    system_instruction,
    transaction::VersionedTransaction,
};
use spl_token::solana_program::{program_option::COption, program_pack::Pack};
use spl_token::state::Mint;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{BlockhashCache, MemoryCacheStore, TokenMetadataCache};
use crate::rpc_manager::{
    AccountSnapshot, RpcGateway, RpcManagerError, SignatureState, SimulationOutcome, TransactionBalances,
};
use crate::tx_builder::instructions::AmmV4PoolKeys;
use crate::tx_builder::BuildContext;
use crate::types::native_mint;
use crate::wallet::WalletManager;

pub const FAKE_ENDPOINT: &str = "fake://rpc";
pub const TOKEN_ACCOUNT_RENT: u64 = 2_039_280;

#[derive(Default)]
pub struct FakeRpc {
    blockhash_fetches: AtomicUsize,
    fail_blockhash: AtomicBool,
    accounts: Mutex<HashMap<Pubkey, AccountSnapshot>>,
    account_lookups: AtomicUsize,
    token_balances: Mutex<HashMap<Pubkey, u64>>,
    simulation_error: Mutex<Option<String>>,
    sent_skip_preflight: Mutex<Vec<bool>>,
    send_script: Mutex<VecDeque<Result<(), RpcManagerError>>>,
    statuses: Mutex<VecDeque<Result<Option<SignatureState>, RpcManagerError>>>,
    default_status: Mutex<Option<SignatureState>>,
    status_polls: AtomicUsize,
    status_delay: Mutex<Option<Duration>>,
    transaction_balances: Mutex<Option<TransactionBalances>>,
}

impl FakeRpc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blockhash_fetches(&self) -> usize {
        self.blockhash_fetches.load(Ordering::SeqCst)
    }

    pub fn fail_blockhash(&self, fail: bool) {
        self.fail_blockhash.store(fail, Ordering::SeqCst);
    }

    pub fn add_mint(&self, mint: Pubkey, decimals: u8) {
        self.accounts.lock().insert(mint, mint_account(decimals, spl_token::id()));
    }

    pub fn remove_account(&self, pubkey: &Pubkey) {
        self.accounts.lock().remove(pubkey);
    }

    pub fn account_lookups(&self) -> usize {
        self.account_lookups.load(Ordering::SeqCst)
    }

    pub fn set_token_balance(&self, pubkey: Pubkey, amount: u64) {
        self.token_balances.lock().insert(pubkey, amount);
    }

    pub fn set_simulation_error(&self, err: Option<String>) {
        *self.simulation_error.lock() = err;
    }

    /// Skip-preflight flag of every send, in order
    pub fn sent_skip_preflight(&self) -> Vec<bool> {
        self.sent_skip_preflight.lock().clone()
    }

    pub fn sends(&self) -> usize {
        self.sent_skip_preflight.lock().len()
    }

    /// Next send fails with `err`; unscripted sends succeed
    pub fn push_send_error(&self, err: RpcManagerError) {
        self.send_script.lock().push_back(Err(err));
    }

    pub fn push_send_timeout(&self) {
        self.push_send_error(RpcManagerError::Timeout {
            endpoint: FAKE_ENDPOINT.into(),
            timeout_ms: 1_000,
        });
    }

    pub fn push_status(&self, state: Option<SignatureState>) {
        self.statuses.lock().push_back(Ok(state));
    }

    pub fn push_status_error(&self) {
        self.statuses.lock().push_back(Err(RpcManagerError::Transport {
            endpoint: FAKE_ENDPOINT.into(),
            message: "connection reset".into(),
        }));
    }

    /// Answer for polls once the script is exhausted
    pub fn set_default_status(&self, state: Option<SignatureState>) {
        *self.default_status.lock() = state;
    }

    /// Every signature lands at `slot` with the requested commitment
    pub fn confirm_everything(&self, slot: u64) {
        self.set_default_status(Some(SignatureState {
            slot,
            err: None,
            commitment_reached: true,
        }));
    }

    /// Every status poll hangs this long before answering
    pub fn set_status_delay(&self, delay: Duration) {
        *self.status_delay.lock() = Some(delay);
    }

    pub fn status_polls(&self) -> usize {
        self.status_polls.load(Ordering::SeqCst)
    }

    pub fn set_transaction_balances(&self, balances: TransactionBalances) {
        *self.transaction_balances.lock() = Some(balances);
    }
}

#[async_trait]
impl RpcGateway for FakeRpc {
    fn endpoint(&self) -> &str {
        FAKE_ENDPOINT
    }

    async fn get_latest_blockhash(&self) -> Result<(Hash, u64), RpcManagerError> {
        if self.fail_blockhash.load(Ordering::SeqCst) {
            return Err(RpcManagerError::Transport {
                endpoint: FAKE_ENDPOINT.into(),
                message: "connection refused".into(),
            });
        }
        let n = self.blockhash_fetches.fetch_add(1, Ordering::SeqCst) as u64;
        Ok((Hash::new_unique(), 1_000 + n))
    }

    async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<AccountSnapshot>, RpcManagerError> {
        self.account_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.accounts.lock().get(pubkey).cloned())
    }

    async fn get_token_account_balance(&self, pubkey: &Pubkey) -> Result<Option<u64>, RpcManagerError> {
        Ok(self.token_balances.lock().get(pubkey).copied())
    }

    async fn get_minimum_balance_for_rent_exemption(&self, _data_len: usize) -> Result<u64, RpcManagerError> {
        Ok(TOKEN_ACCOUNT_RENT)
    }

    async fn simulate_transaction(
        &self,
        _tx: &VersionedTransaction,
    ) -> Result<SimulationOutcome, RpcManagerError> {
        Ok(SimulationOutcome {
            err: self.simulation_error.lock().clone(),
            logs: vec!["Program log: simulated".into()],
            units_consumed: Some(42_000),
        })
    }

    async fn send_transaction(
        &self,
        tx: &VersionedTransaction,
        skip_preflight: bool,
    ) -> Result<Signature, RpcManagerError> {
        self.sent_skip_preflight.lock().push(skip_preflight);
        if let Some(Err(e)) = self.send_script.lock().pop_front() {
            return Err(e);
        }
        tx.signatures
            .first()
            .copied()
            .ok_or_else(|| RpcManagerError::InvalidResponse("unsigned transaction".into()))
    }

    async fn get_signature_status(
        &self,
        _signature: &Signature,
        _commitment: CommitmentLevel,
    ) -> Result<Option<SignatureState>, RpcManagerError> {
        self.status_polls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.status_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.statuses.lock().pop_front() {
            Some(scripted) => scripted,
            None => Ok(self.default_status.lock().clone()),
        }
    }

    async fn get_transaction_balances(
        &self,
        _signature: &Signature,
        _commitment: CommitmentLevel,
    ) -> Result<Option<TransactionBalances>, RpcManagerError> {
        Ok(self.transaction_balances.lock().clone())
    }
}

/// An initialized mint account owned by `owner`
pub fn mint_account(decimals: u8, owner: Pubkey) -> AccountSnapshot {
    let mut data = vec![0u8; Mint::LEN];
    let mint = Mint {
        mint_authority: COption::None,
        supply: 1_000_000_000,
        decimals,
        is_initialized: true,
        freeze_authority: COption::None,
    };
    mint.pack_into_slice(&mut data);
    AccountSnapshot {
        owner,
        lamports: 1_461_600,
        data,
    }
}

/// A v0 transfer with `payer` as the only signer, signature slots zeroed
pub fn unsigned_transfer(payer: &Pubkey) -> VersionedTransaction {
    let ix = system_instruction::transfer(payer, &Pubkey::new_unique(), 1_000);
    let message = v0::Message::try_compile(payer, &[ix], &[], Hash::new_unique())
        .expect("compile transfer");
    VersionedTransaction {
        signatures: vec![Signature::default()],
        message: VersionedMessage::V0(message),
    }
}

pub fn signed_transfer() -> VersionedTransaction {
    let payer = Keypair::new();
    let unsigned = unsigned_transfer(&payer.pubkey());
    VersionedTransaction::try_new(unsigned.message, &[&payer]).expect("sign transfer")
}

/// AMM v4 pool keys pairing `mint` (base) with WSOL (quote)
pub fn pool_keys(mint: Pubkey) -> AmmV4PoolKeys {
    AmmV4PoolKeys {
        amm_id: Pubkey::new_unique(),
        amm_authority: Pubkey::new_unique(),
        amm_open_orders: Pubkey::new_unique(),
        amm_target_orders: Pubkey::new_unique(),
        base_mint: mint,
        quote_mint: native_mint(),
        base_vault: Pubkey::new_unique(),
        quote_vault: Pubkey::new_unique(),
        market_program_id: Pubkey::new_unique(),
        market_id: Pubkey::new_unique(),
        market_bids: Pubkey::new_unique(),
        market_asks: Pubkey::new_unique(),
        market_event_queue: Pubkey::new_unique(),
        market_base_vault: Pubkey::new_unique(),
        market_quote_vault: Pubkey::new_unique(),
        market_authority: Pubkey::new_unique(),
    }
}

/// Build context over a fresh `FakeRpc` with one signing wallet
pub async fn build_context() -> (BuildContext, Arc<FakeRpc>, Pubkey) {
    let rpc = Arc::new(FakeRpc::new());
    let keypair = Keypair::new();
    let user = keypair.pubkey();
    let wallet = Arc::new(WalletManager::from_keypair(keypair));
    let tokens = Arc::new(TokenMetadataCache::new(rpc.clone()));
    let blockhash = Arc::new(BlockhashCache::new(
        Arc::new(MemoryCacheStore::new()),
        rpc.clone(),
        Duration::from_secs(30),
    ));
    (BuildContext::new(wallet, tokens, blockhash, rpc.clone()), rpc, user)
}

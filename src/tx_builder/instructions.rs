//! Instruction planning for locally assembled swaps
//!
//! Order inside a plan is fixed:
//! 1. Compute budget instructions (CU limit, CU price)
//! 2. Setup (ephemeral WSOL account, destination token account)
//! 3. The swap itself
//! 4. Cleanup (close the ephemeral account)
//! 5. Relay tip, last so a failed swap never pays it

use solana_sdk::{
    compute_budget::ComputeBudgetInstruction,
    instruction::{AccountMeta, Instruction},
    pubkey,
    pubkey::Pubkey,
    system_instruction,
};

use super::BuildError;
use crate::types::native_mint;

pub const RAYDIUM_AMM_V4_PROGRAM_ID: Pubkey = pubkey!("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8");

/// `swap_base_in` instruction tag
const SWAP_BASE_IN: u8 = 9;

/// Size of an SPL token account
pub const TOKEN_ACCOUNT_LEN: usize = 165;

#[derive(Debug, Clone, Default)]
pub struct InstructionPlan {
    pub compute_budget: Vec<Instruction>,
    pub setup: Vec<Instruction>,
    pub swap: Vec<Instruction>,
    pub cleanup: Vec<Instruction>,
    pub tip: Option<Instruction>,
}

impl InstructionPlan {
    pub fn new(cu_limit: u32, cu_price_micro_lamports: u64) -> Self {
        let mut compute_budget = Vec::with_capacity(2);
        if cu_limit > 0 {
            compute_budget.push(ComputeBudgetInstruction::set_compute_unit_limit(cu_limit));
        }
        if cu_price_micro_lamports > 0 {
            compute_budget.push(ComputeBudgetInstruction::set_compute_unit_price(
                cu_price_micro_lamports,
            ));
        }
        Self {
            compute_budget,
            ..Self::default()
        }
    }

    /// Flatten in execution order
    pub fn into_instructions(self) -> Vec<Instruction> {
        let mut out = Vec::with_capacity(
            self.compute_budget.len() + self.setup.len() + self.swap.len() + self.cleanup.len() + 1,
        );
        out.extend(self.compute_budget);
        out.extend(self.setup);
        out.extend(self.swap);
        out.extend(self.cleanup);
        out.extend(self.tip);
        out
    }
}

/// Accounts of a Raydium AMM v4 pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmmV4PoolKeys {
    pub amm_id: Pubkey,
    pub amm_authority: Pubkey,
    pub amm_open_orders: Pubkey,
    pub amm_target_orders: Pubkey,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub market_program_id: Pubkey,
    pub market_id: Pubkey,
    pub market_bids: Pubkey,
    pub market_asks: Pubkey,
    pub market_event_queue: Pubkey,
    pub market_base_vault: Pubkey,
    pub market_quote_vault: Pubkey,
    pub market_authority: Pubkey,
}

impl AmmV4PoolKeys {
    /// The non-WSOL side of the pool
    pub fn token_mint(&self) -> Pubkey {
        if self.base_mint == native_mint() {
            self.quote_mint
        } else {
            self.base_mint
        }
    }

    /// (input vault, output vault) when swapping `input_mint` in
    pub fn vaults_for_input(&self, input_mint: &Pubkey) -> Option<(Pubkey, Pubkey)> {
        if *input_mint == self.base_mint {
            Some((self.base_vault, self.quote_vault))
        } else if *input_mint == self.quote_mint {
            Some((self.quote_vault, self.base_vault))
        } else {
            None
        }
    }
}

pub fn swap_base_in(
    keys: &AmmV4PoolKeys,
    user_source: &Pubkey,
    user_destination: &Pubkey,
    owner: &Pubkey,
    amount_in: u64,
    minimum_amount_out: u64,
) -> Instruction {
    let mut data = Vec::with_capacity(17);
    data.push(SWAP_BASE_IN);
    data.extend_from_slice(&amount_in.to_le_bytes());
    data.extend_from_slice(&minimum_amount_out.to_le_bytes());

    let accounts = vec![
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new(keys.amm_id, false),
        AccountMeta::new_readonly(keys.amm_authority, false),
        AccountMeta::new(keys.amm_open_orders, false),
        AccountMeta::new(keys.amm_target_orders, false),
        AccountMeta::new(keys.base_vault, false),
        AccountMeta::new(keys.quote_vault, false),
        AccountMeta::new_readonly(keys.market_program_id, false),
        AccountMeta::new(keys.market_id, false),
        AccountMeta::new(keys.market_bids, false),
        AccountMeta::new(keys.market_asks, false),
        AccountMeta::new(keys.market_event_queue, false),
        AccountMeta::new(keys.market_base_vault, false),
        AccountMeta::new(keys.market_quote_vault, false),
        AccountMeta::new_readonly(keys.market_authority, false),
        AccountMeta::new(*user_source, false),
        AccountMeta::new(*user_destination, false),
        AccountMeta::new_readonly(*owner, true),
    ];

    Instruction {
        program_id: RAYDIUM_AMM_V4_PROGRAM_ID,
        accounts,
        data,
    }
}

/// Instructions opening a seed-derived WSOL account funded with `lamports`
/// and the one closing it back into `owner`. Returns (account, open, close).
pub fn ephemeral_wsol_account(
    owner: &Pubkey,
    seed: &str,
    lamports: u64,
) -> Result<(Pubkey, Vec<Instruction>, Instruction), BuildError> {
    let token_program = spl_token::id();
    let account = Pubkey::create_with_seed(owner, seed, &token_program)
        .map_err(|e| BuildError::instruction_failed("system", format!("seed derivation: {e}")))?;

    let create = system_instruction::create_account_with_seed(
        owner,
        &account,
        owner,
        seed,
        lamports,
        TOKEN_ACCOUNT_LEN as u64,
        &token_program,
    );
    let init = spl_token::instruction::initialize_account(&token_program, &account, &native_mint(), owner)
        .map_err(|e| BuildError::instruction_failed("spl_token", e.to_string()))?;
    let close = spl_token::instruction::close_account(&token_program, &account, owner, owner, &[])
        .map_err(|e| BuildError::instruction_failed("spl_token", e.to_string()))?;

    Ok((account, vec![create, init], close))
}

/// Constant-product output after the pool fee
pub fn constant_product_out(amount_in: u64, reserve_in: u64, reserve_out: u64, fee_bps: u64) -> u64 {
    if reserve_in == 0 || reserve_out == 0 {
        return 0;
    }
    let in_after_fee = amount_in as u128 * (10_000 - fee_bps.min(10_000)) as u128 / 10_000;
    let out = reserve_out as u128 * in_after_fee / (reserve_in as u128 + in_after_fee);
    out as u64
}

pub fn apply_slippage(amount: u64, slippage_bps: u16) -> u64 {
    let keep = 10_000u128.saturating_sub(slippage_bps as u128);
    (amount as u128 * keep / 10_000) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::compute_budget;

    fn keys() -> AmmV4PoolKeys {
        AmmV4PoolKeys {
            amm_id: Pubkey::new_unique(),
            amm_authority: Pubkey::new_unique(),
            amm_open_orders: Pubkey::new_unique(),
            amm_target_orders: Pubkey::new_unique(),
            base_mint: Pubkey::new_unique(),
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

    #[test]
    fn test_swap_base_in_layout() {
        let keys = keys();
        let owner = Pubkey::new_unique();
        let ix = swap_base_in(&keys, &Pubkey::new_unique(), &Pubkey::new_unique(), &owner, 1_000, 900);
        assert_eq!(ix.program_id, RAYDIUM_AMM_V4_PROGRAM_ID);
        assert_eq!(ix.data[0], 9);
        assert_eq!(u64::from_le_bytes(ix.data[1..9].try_into().unwrap()), 1_000);
        assert_eq!(u64::from_le_bytes(ix.data[9..17].try_into().unwrap()), 900);
        assert_eq!(ix.accounts.len(), 18);
        let last = ix.accounts.last().unwrap();
        assert_eq!(last.pubkey, owner);
        assert!(last.is_signer);
    }

    #[test]
    fn test_plan_ordering() {
        let owner = Pubkey::new_unique();
        let (_, open, close) = ephemeral_wsol_account(&owner, "seed", 2_039_280).unwrap();
        let mut plan = InstructionPlan::new(200_000, 10_000);
        plan.setup.extend(open);
        plan.swap.push(swap_base_in(&keys(), &Pubkey::new_unique(), &Pubkey::new_unique(), &owner, 1, 1));
        plan.cleanup.push(close);
        plan.tip = Some(system_instruction::transfer(&owner, &Pubkey::new_unique(), 1_000));

        let ixs = plan.into_instructions();
        assert_eq!(ixs.len(), 7);
        assert_eq!(ixs[0].program_id, compute_budget::id());
        assert_eq!(ixs[1].program_id, compute_budget::id());
        assert_eq!(ixs[4].program_id, RAYDIUM_AMM_V4_PROGRAM_ID);
        assert_eq!(ixs[5].program_id, spl_token::id());
        assert_eq!(ixs[6].program_id, solana_sdk::system_program::id());
    }

    #[test]
    fn test_zero_budget_skips_compute_instructions() {
        assert!(InstructionPlan::new(0, 0).into_instructions().is_empty());
    }

    #[test]
    fn test_constant_product() {
        // 1% of a balanced pool loses a little to price impact and the fee
        let out = constant_product_out(10_000, 1_000_000, 1_000_000, 25);
        assert!(out < 10_000 && out > 9_800);
        assert_eq!(constant_product_out(10, 0, 100, 25), 0);
        assert_eq!(apply_slippage(10_000, 100), 9_900);
        assert_eq!(apply_slippage(10_000, 20_000), 0);
    }

    #[test]
    fn test_vaults_for_input() {
        let keys = keys();
        assert_eq!(
            keys.vaults_for_input(&native_mint()),
            Some((keys.quote_vault, keys.base_vault))
        );
        assert_eq!(keys.token_mint(), keys.base_mint);
        assert!(keys.vaults_for_input(&Pubkey::new_unique()).is_none());
    }
}

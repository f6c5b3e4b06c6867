//! Direct swaps against Raydium AMM v4 pools
//!
//! No quote service is involved: reserves are read from the pool vaults and the
//! minimum output is derived locally. Native SOL moves through a seed-derived
//! WSOL account that lives only for the duration of the transaction.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use solana_sdk::{
    message::{v0, VersionedMessage},
    pubkey::Pubkey,
    system_instruction,
    transaction::VersionedTransaction,
};
use spl_associated_token_account::{
    get_associated_token_address_with_program_id, instruction::create_associated_token_account_idempotent,
};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use super::instructions::{self, AmmV4PoolKeys, InstructionPlan, TOKEN_ACCOUNT_LEN};
use super::routing::{self, parse_pubkey};
use super::{BuildContext, BuildError, BuilderKind, BuiltTransaction, TransactionBuilder};
use crate::config::{DirectPoolConfig, PoolKeysConfig};
use crate::types::{SwapDirection, SwapInType, SwapIntent};

/// Trade fee charged by AMM v4 pools
pub const POOL_FEE_BPS: u64 = 25;

const PROGRAM: &str = "raydium_amm_v4";

impl TryFrom<&PoolKeysConfig> for AmmV4PoolKeys {
    type Error = BuildError;

    fn try_from(c: &PoolKeysConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            amm_id: parse_pubkey("amm_id", &c.amm_id)?,
            amm_authority: parse_pubkey("amm_authority", &c.amm_authority)?,
            amm_open_orders: parse_pubkey("amm_open_orders", &c.amm_open_orders)?,
            amm_target_orders: parse_pubkey("amm_target_orders", &c.amm_target_orders)?,
            base_mint: parse_pubkey("base_mint", &c.base_mint)?,
            quote_mint: parse_pubkey("quote_mint", &c.quote_mint)?,
            base_vault: parse_pubkey("base_vault", &c.base_vault)?,
            quote_vault: parse_pubkey("quote_vault", &c.quote_vault)?,
            market_program_id: parse_pubkey("market_program_id", &c.market_program_id)?,
            market_id: parse_pubkey("market_id", &c.market_id)?,
            market_bids: parse_pubkey("market_bids", &c.market_bids)?,
            market_asks: parse_pubkey("market_asks", &c.market_asks)?,
            market_event_queue: parse_pubkey("market_event_queue", &c.market_event_queue)?,
            market_base_vault: parse_pubkey("market_base_vault", &c.market_base_vault)?,
            market_quote_vault: parse_pubkey("market_quote_vault", &c.market_quote_vault)?,
            market_authority: parse_pubkey("market_authority", &c.market_authority)?,
        })
    }
}

/// Pools keyed by the token they trade against SOL
#[derive(Debug, Clone, Default)]
pub struct PoolRegistry {
    pools: HashMap<Pubkey, AmmV4PoolKeys>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(configs: &[PoolKeysConfig]) -> Result<Self, BuildError> {
        let mut registry = Self::new();
        for config in configs {
            registry.insert(AmmV4PoolKeys::try_from(config)?);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, keys: AmmV4PoolKeys) {
        self.pools.insert(keys.token_mint(), keys);
    }

    pub fn get(&self, mint: &Pubkey) -> Option<&AmmV4PoolKeys> {
        self.pools.get(mint)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

pub struct DirectPoolBuilder {
    pools: PoolRegistry,
    compute_unit_limit: u32,
    compute_unit_price: u64,
    tip_accounts: Vec<Pubkey>,
}

impl DirectPoolBuilder {
    pub fn new(pools: PoolRegistry, compute_unit_limit: u32, compute_unit_price: u64, tip_accounts: Vec<Pubkey>) -> Self {
        Self {
            pools,
            compute_unit_limit,
            compute_unit_price,
            tip_accounts,
        }
    }

    pub fn from_config(config: &DirectPoolConfig, pools: PoolRegistry, tip_accounts: &[String]) -> Result<Self, BuildError> {
        let tip_accounts = tip_accounts
            .iter()
            .map(|a| parse_pubkey("tip_account", a))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(
            pools,
            config.compute_unit_limit,
            config.compute_unit_price_micro_lamports,
            tip_accounts,
        ))
    }

    fn pick_tip_account(&self) -> Option<Pubkey> {
        self.tip_accounts.choose(&mut rand::thread_rng()).copied()
    }

    async fn reserves(&self, ctx: &BuildContext, input_vault: &Pubkey, output_vault: &Pubkey) -> Result<(u64, u64), BuildError> {
        let (reserve_in, reserve_out) = tokio::try_join!(
            ctx.rpc.get_token_account_balance(input_vault),
            ctx.rpc.get_token_account_balance(output_vault),
        )?;
        match (reserve_in, reserve_out) {
            (Some(i), Some(o)) if i > 0 && o > 0 => Ok((i, o)),
            _ => Err(BuildError::instruction_failed(PROGRAM, "pool vaults are empty or missing")),
        }
    }
}

#[async_trait]
impl TransactionBuilder for DirectPoolBuilder {
    fn kind(&self) -> BuilderKind {
        BuilderKind::DirectPool
    }

    async fn build(&self, ctx: &BuildContext, intent: &SwapIntent) -> Result<BuiltTransaction, BuildError> {
        let prepared = routing::prepare(ctx, intent, self.kind(), &[SwapInType::Percentage]).await?;
        let route = &prepared.route;
        let owner = prepared.owner;
        let token_mint = route.token_mint();

        let keys = self
            .pools
            .get(&token_mint)
            .ok_or_else(|| BuildError::PoolNotFound(token_mint.to_string()))?;
        let (input_vault, output_vault) = keys
            .vaults_for_input(&route.input_mint)
            .ok_or_else(|| BuildError::PoolNotFound(token_mint.to_string()))?;

        let token = match &route.token {
            Some(token) => *token,
            None => ctx
                .tokens
                .get(&token_mint)
                .await?
                .ok_or_else(|| BuildError::TokenMetadataMissing {
                    mint: token_mint.to_string(),
                })?,
        };

        let (reserve_in, reserve_out) = self.reserves(ctx, &input_vault, &output_vault).await?;
        let expected_out = instructions::constant_product_out(route.amount, reserve_in, reserve_out, POOL_FEE_BPS);
        let minimum_out = instructions::apply_slippage(expected_out, intent.slippage_bps);
        if minimum_out == 0 {
            return Err(BuildError::InvalidAmount(format!(
                "{} in yields nothing against reserves {reserve_in}/{reserve_out}",
                route.amount
            )));
        }

        let rent = ctx
            .rpc
            .get_minimum_balance_for_rent_exemption(TOKEN_ACCOUNT_LEN)
            .await?;
        let is_buy = route.direction == SwapDirection::Buy;
        let wsol_lamports = if is_buy {
            rent.checked_add(route.amount)
                .ok_or_else(|| BuildError::InvalidAmount(format!("{} plus rent {rent} overflows u64", route.amount)))?
        } else {
            rent
        };

        // Seeds are capped at 32 bytes
        let seed = Uuid::new_v4().simple().to_string();
        let (wsol_account, open, close) = instructions::ephemeral_wsol_account(&owner, &seed, wsol_lamports)?;
        let token_account = get_associated_token_address_with_program_id(&owner, &token_mint, &token.token_program);
        let (source, destination) = if is_buy {
            (wsol_account, token_account)
        } else {
            (token_account, wsol_account)
        };

        let mut plan = InstructionPlan::new(self.compute_unit_limit, self.compute_unit_price);
        plan.setup.extend(open);
        plan.setup.push(create_associated_token_account_idempotent(
            &owner,
            &owner,
            &token_mint,
            &token.token_program,
        ));
        plan.swap.push(instructions::swap_base_in(
            keys,
            &source,
            &destination,
            &owner,
            route.amount,
            minimum_out,
        ));
        plan.cleanup.push(close);

        if intent.use_priority_relay {
            let tip = prepared.priority_fee_lamports.ok_or(BuildError::MissingPriorityFee)?;
            let tip_account = self
                .pick_tip_account()
                .ok_or_else(|| BuildError::instruction_failed("system", "no tip accounts configured"))?;
            plan.tip = Some(system_instruction::transfer(&owner, &tip_account, tip));
        }

        let snapshot = ctx.blockhash.get().await?;
        let message = v0::Message::try_compile(&owner, &plan.into_instructions(), &[], snapshot.blockhash)
            .map_err(|e| BuildError::instruction_failed(PROGRAM, format!("compile: {e}")))?;
        let transaction = VersionedTransaction::try_new(VersionedMessage::V0(message), &[prepared.signer.as_ref()])
            .map_err(|e| BuildError::Signing(e.to_string()))?;

        debug!(
            intent_id = %intent.id,
            amm = %keys.amm_id,
            amount_in = route.amount,
            minimum_out,
            "Direct pool swap assembled"
        );

        Ok(BuiltTransaction::new(
            transaction,
            Some(snapshot.last_valid_block_height),
            prepared.route,
            self.kind(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::{build_context, pool_keys};
    use crate::tx_builder::instructions::RAYDIUM_AMM_V4_PROGRAM_ID;
    use crate::types::native_mint;
    use solana_sdk::compute_budget;

    fn builder(keys: AmmV4PoolKeys, tips: Vec<Pubkey>) -> DirectPoolBuilder {
        let mut pools = PoolRegistry::new();
        pools.insert(keys);
        DirectPoolBuilder::new(pools, 200_000, 100_000, tips)
    }

    #[test]
    fn test_registry_keys_by_token_side() {
        let keys = pool_keys(Pubkey::new_unique());
        let mut registry = PoolRegistry::new();
        registry.insert(keys);
        assert_eq!(registry.get(&keys.base_mint), Some(&keys));
        assert!(registry.get(&native_mint()).is_none());
    }

    #[test]
    fn test_bad_pool_config_names_the_field() {
        let config = PoolKeysConfig {
            amm_id: "not-a-key".into(),
            amm_authority: String::new(),
            amm_open_orders: String::new(),
            amm_target_orders: String::new(),
            base_mint: String::new(),
            quote_mint: String::new(),
            base_vault: String::new(),
            quote_vault: String::new(),
            market_program_id: String::new(),
            market_id: String::new(),
            market_bids: String::new(),
            market_asks: String::new(),
            market_event_queue: String::new(),
            market_base_vault: String::new(),
            market_quote_vault: String::new(),
            market_authority: String::new(),
        };
        assert!(matches!(
            AmmV4PoolKeys::try_from(&config),
            Err(BuildError::InvalidMint { field: "amm_id", .. })
        ));
    }

    #[tokio::test]
    async fn test_buy_assembles_full_instruction_sequence() {
        let (ctx, rpc, user) = build_context().await;
        let mint = Pubkey::new_unique();
        rpc.add_mint(mint, 6);
        let keys = pool_keys(mint);
        rpc.set_token_balance(keys.base_vault, 1_000_000_000_000);
        rpc.set_token_balance(keys.quote_vault, 500_000_000_000);
        let tip = Pubkey::new_unique();

        let intent = SwapIntent::buy(mint.to_string(), user.to_string(), 0.5).with_priority_relay(Some(0.0001));
        let built = builder(keys, vec![tip]).build(&ctx, &intent).await.unwrap();

        let message = &built.transaction.message;
        let keys_in_msg = message.static_account_keys();
        let programs: Vec<Pubkey> = message
            .instructions()
            .iter()
            .map(|ix| keys_in_msg[ix.program_id_index as usize])
            .collect();
        assert_eq!(
            programs,
            vec![
                compute_budget::id(),
                compute_budget::id(),
                solana_sdk::system_program::id(),
                spl_token::id(),
                spl_associated_token_account::id(),
                RAYDIUM_AMM_V4_PROGRAM_ID,
                spl_token::id(),
                solana_sdk::system_program::id(),
            ]
        );
        assert!(keys_in_msg.contains(&tip));
        assert_eq!(built.route.amount, 500_000_000);
        assert!(built.last_valid_block_height.is_some());
        assert!(built.transaction.verify_with_results().iter().all(|ok| *ok));
    }

    #[tokio::test]
    async fn test_buy_funding_overflow_is_rejected() {
        let (ctx, rpc, user) = build_context().await;
        let mint = Pubkey::new_unique();
        rpc.add_mint(mint, 6);
        let keys = pool_keys(mint);
        rpc.set_token_balance(keys.base_vault, 1_000_000_000_000);
        rpc.set_token_balance(keys.quote_vault, 500_000_000_000);

        // Just under u64::MAX lamports, so only the added rent overflows
        let intent = SwapIntent::buy(mint.to_string(), user.to_string(), 18_446_744_073.709);
        assert!(matches!(
            builder(keys, vec![]).build(&ctx, &intent).await,
            Err(BuildError::InvalidAmount(msg)) if msg.contains("overflows")
        ));
    }

    #[tokio::test]
    async fn test_quantity_sell_is_unsupported() {
        let (ctx, rpc, user) = build_context().await;
        let mint = Pubkey::new_unique();
        rpc.add_mint(mint, 6);
        let intent = SwapIntent::sell(mint.to_string(), user.to_string(), 10.0, SwapInType::Quantity);
        assert!(matches!(
            builder(pool_keys(mint), vec![]).build(&ctx, &intent).await,
            Err(BuildError::UnsupportedInType {
                strategy: BuilderKind::DirectPool,
                in_type: SwapInType::Quantity
            })
        ));
    }

    #[tokio::test]
    async fn test_unregistered_mint() {
        let (ctx, rpc, user) = build_context().await;
        let mint = Pubkey::new_unique();
        rpc.add_mint(mint, 6);
        let intent = SwapIntent::buy(mint.to_string(), user.to_string(), 0.5);
        assert!(matches!(
            builder(pool_keys(Pubkey::new_unique()), vec![]).build(&ctx, &intent).await,
            Err(BuildError::PoolNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_percentage_sell_uses_balance() {
        let (ctx, rpc, user) = build_context().await;
        let mint = Pubkey::new_unique();
        rpc.add_mint(mint, 6);
        let keys = pool_keys(mint);
        rpc.set_token_balance(keys.base_vault, 1_000_000_000_000);
        rpc.set_token_balance(keys.quote_vault, 500_000_000_000);
        let ata = get_associated_token_address_with_program_id(&user, &mint, &spl_token::id());
        rpc.set_token_balance(ata, 8_000_000);

        let intent = SwapIntent::sell(mint.to_string(), user.to_string(), 25.0, SwapInType::Percentage);
        let built = builder(keys, vec![]).build(&ctx, &intent).await.unwrap();
        assert_eq!(built.route.amount, 2_000_000);
        assert_eq!(built.route.output_mint, native_mint());
    }
}

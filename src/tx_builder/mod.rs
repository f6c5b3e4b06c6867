//! Transaction building
//!
//! A builder turns a [`SwapIntent`] into a signed [`BuiltTransaction`]. Three
//! strategies share one validation and routing front end:
//!
//! - **amm_routed**: quote and swap through an aggregator HTTP API, sign locally
//! - **limit_order**: create a limit order through the order API, sign locally
//! - **direct_pool**: assemble a Raydium AMM v4 swap from configured pool keys
//!
//! ## Validation order
//!
//! Direction, sell in_type, relay fee, strategy in_type support, then token
//! metadata. The first three never touch the network.
//!
//! ## Modules
//! - **errors**: error taxonomy with validation/collaborator split
//! - **routing**: intent checks and base-unit amounts
//! - **instructions**: instruction planning for locally assembled swaps
//! - **signing**: signing of service-assembled transactions
//! - **output**: the signed transaction handed to senders

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub mod amm_routed;
pub mod direct_pool;
pub mod errors;
pub mod instructions;
pub mod limit_order;
pub mod output;
pub mod routing;
pub mod signing;

pub use amm_routed::AmmRoutedBuilder;
pub use direct_pool::{DirectPoolBuilder, PoolRegistry};
pub use errors::BuildError;
pub use limit_order::LimitOrderBuilder;
pub use output::BuiltTransaction;
pub use routing::{PreparedSwap, SwapRoute};

use crate::cache::{BlockhashCache, TokenMetadataCache};
use crate::config::Config;
use crate::rpc_manager::RpcGateway;
use crate::types::SwapIntent;
use crate::wallet::WalletManager;

/// Strategy selector, as named in config and on intents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuilderKind {
    #[default]
    AmmRouted,
    LimitOrder,
    DirectPool,
}

impl fmt::Display for BuilderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuilderKind::AmmRouted => write!(f, "amm_routed"),
            BuilderKind::LimitOrder => write!(f, "limit_order"),
            BuilderKind::DirectPool => write!(f, "direct_pool"),
        }
    }
}

/// Shared collaborators every strategy builds against
#[derive(Clone)]
pub struct BuildContext {
    pub wallet: Arc<WalletManager>,
    pub tokens: Arc<TokenMetadataCache>,
    pub blockhash: Arc<BlockhashCache>,
    pub rpc: Arc<dyn RpcGateway>,
}

impl BuildContext {
    pub fn new(
        wallet: Arc<WalletManager>,
        tokens: Arc<TokenMetadataCache>,
        blockhash: Arc<BlockhashCache>,
        rpc: Arc<dyn RpcGateway>,
    ) -> Self {
        Self {
            wallet,
            tokens,
            blockhash,
            rpc,
        }
    }
}

#[async_trait]
pub trait TransactionBuilder: Send + Sync {
    fn kind(&self) -> BuilderKind;

    async fn build(&self, ctx: &BuildContext, intent: &SwapIntent) -> Result<BuiltTransaction, BuildError>;
}

/// Closed set of strategies
pub enum BuilderStrategy {
    AmmRouted(AmmRoutedBuilder),
    LimitOrder(LimitOrderBuilder),
    DirectPool(DirectPoolBuilder),
}

impl BuilderStrategy {
    fn as_builder(&self) -> &dyn TransactionBuilder {
        match self {
            BuilderStrategy::AmmRouted(b) => b,
            BuilderStrategy::LimitOrder(b) => b,
            BuilderStrategy::DirectPool(b) => b,
        }
    }

    pub fn kind(&self) -> BuilderKind {
        self.as_builder().kind()
    }
}

/// Picks the strategy for an intent and runs it
pub struct BuilderRouter {
    ctx: BuildContext,
    default: BuilderKind,
    strategies: HashMap<BuilderKind, BuilderStrategy>,
}

impl BuilderRouter {
    pub fn new(ctx: BuildContext, default: BuilderKind) -> Self {
        Self {
            ctx,
            default,
            strategies: HashMap::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: BuilderStrategy) -> Self {
        self.strategies.insert(strategy.kind(), strategy);
        self
    }

    /// Register every strategy the config provides for. Direct-pool is only
    /// available when at least one pool is configured.
    pub fn from_config(ctx: BuildContext, config: &Config) -> anyhow::Result<Self> {
        let mut router = Self::new(ctx, config.trading.builder)
            .with_strategy(BuilderStrategy::AmmRouted(AmmRoutedBuilder::from_config(&config.amm_routed)?))
            .with_strategy(BuilderStrategy::LimitOrder(LimitOrderBuilder::from_config(
                &config.limit_order,
                &config.priority_relay.tip_accounts,
            )?));

        if !config.direct_pool.pools.is_empty() {
            let pools = PoolRegistry::from_config(&config.direct_pool.pools)?;
            router = router.with_strategy(BuilderStrategy::DirectPool(DirectPoolBuilder::from_config(
                &config.direct_pool,
                pools,
                &config.priority_relay.tip_accounts,
            )?));
        }
        Ok(router)
    }

    pub fn default_kind(&self) -> BuilderKind {
        self.default
    }

    pub fn has_strategy(&self, kind: BuilderKind) -> bool {
        self.strategies.contains_key(&kind)
    }

    pub fn context(&self) -> &BuildContext {
        &self.ctx
    }

    pub async fn build(&self, intent: &SwapIntent) -> Result<BuiltTransaction, BuildError> {
        routing::validate_intent(intent)?;

        let kind = intent.builder.unwrap_or(self.default);
        let strategy = self
            .strategies
            .get(&kind)
            .ok_or(BuildError::StrategyUnavailable(kind))?;

        debug!(intent_id = %intent.id, strategy = %kind, "Building transaction");
        strategy.as_builder().build(&self.ctx, intent).await
    }
}

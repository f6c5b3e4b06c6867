//! Configuration module for the swap execution engine
//!
//! Configuration is read from a TOML file layered with `TRADING__SECTION__KEY`
//! environment overrides (a `.env` file is honoured). Every section has defaults,
//! so an empty file yields a runnable dry-run setup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::CommitmentLevel;
use std::path::Path;
use std::time::Duration;

use crate::copytrade::CopyTradeRule;
use crate::sender::SenderKind;
use crate::tx_builder::BuilderKind;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rpc: RpcConfig,
    pub redis: RedisConfig,
    pub wallet: WalletConfig,
    pub trading: TradingConfig,
    pub engine: EngineConfig,
    pub stream: StreamConfig,
    pub cache: CacheConfig,
    pub amm_routed: AmmRoutedConfig,
    pub limit_order: LimitOrderConfig,
    pub direct_pool: DirectPoolConfig,
    pub priority_relay: PriorityRelayConfig,
    pub hosted_relay: HostedRelayConfig,
    pub settlement: SettlementConfig,
    pub copytrade: CopyTradeConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoint")]
    pub endpoint: String,

    /// Request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,

    /// Commitment for reads and preflight
    #[serde(default = "default_rpc_commitment")]
    pub commitment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Keypair files (JSON array or raw 64 bytes)
    #[serde(default)]
    pub keypair_paths: Vec<String>,

    /// Name of an environment variable holding a base58 secret key
    #[serde(default)]
    pub secret_key_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Strategy used when an intent does not name one
    #[serde(default)]
    pub builder: BuilderKind,

    /// Sender for intents that do not request the priority relay
    #[serde(default)]
    pub default_sender: SenderKind,

    /// Let the RPC node run preflight simulation on submission
    #[serde(default = "default_true")]
    pub preflight_check: bool,

    /// Simulate locally before submitting, when the sender supports it
    #[serde(default)]
    pub simulate_before_send: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,

    /// Parallel stream readers, each a distinct consumer in the group
    #[serde(default = "default_readers")]
    pub readers: usize,

    /// Messages older than this at read time are dropped unexecuted
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    #[serde(default = "default_read_batch_size")]
    pub read_batch_size: usize,

    #[serde(default = "default_read_block_ms")]
    pub read_block_ms: u64,

    /// Pending entries idle for longer than this are claimed from other consumers
    #[serde(default = "default_claim_idle_ms")]
    pub claim_idle_ms: u64,

    /// Read-but-not-yet-admitted intents buffered between readers and the gate
    #[serde(default = "default_admission_buffer")]
    pub admission_buffer: usize,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    /// Exponential base
    #[serde(default = "default_retry_base")]
    pub base: f64,

    /// Delay unit in milliseconds; attempt n waits up to `factor_ms * base^n`
    #[serde(default = "default_retry_factor_ms")]
    pub factor_ms: u64,

    /// Wall-time budget across all attempts
    #[serde(default = "default_retry_max_elapsed_ms")]
    pub max_elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Redis,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default)]
    pub backend: Backend,

    #[serde(default = "default_inbound_stream")]
    pub inbound_stream: String,

    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Reader `i` consumes as `{consumer_prefix}:{i}`
    #[serde(default = "default_consumer_prefix")]
    pub consumer_prefix: String,

    #[serde(default = "default_outbound_stream")]
    pub outbound_stream: String,

    /// Approximate cap on the outbound stream length
    #[serde(default = "default_outbound_maxlen")]
    pub outbound_maxlen: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_blockhash_ttl_secs")]
    pub blockhash_ttl_secs: u64,

    /// Background refresh interval, 0 disables the refresher
    #[serde(default = "default_blockhash_refresh_ms")]
    pub blockhash_refresh_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmmRoutedConfig {
    #[serde(default = "default_quote_url")]
    pub base_url: String,

    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,

    /// Quote service calls per second, 0 disables throttling
    #[serde(default = "default_quote_rps")]
    pub rate_limit_rps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitOrderConfig {
    #[serde(default = "default_limit_url")]
    pub base_url: String,

    /// Output per unit of input, in ui units
    #[serde(default = "default_target_ratio")]
    pub target_ratio: f64,

    /// Micro-lamports per compute unit; unset lets the service decide
    #[serde(default)]
    pub compute_unit_price: Option<u64>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectPoolConfig {
    #[serde(default = "default_compute_unit_limit")]
    pub compute_unit_limit: u32,

    #[serde(default = "default_compute_unit_price")]
    pub compute_unit_price_micro_lamports: u64,

    /// Raydium AMM v4 pool account sets, keyed by the token mint they trade against SOL
    #[serde(default)]
    pub pools: Vec<PoolKeysConfig>,
}

/// Account set of a Raydium AMM v4 pool, as base58 strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolKeysConfig {
    pub amm_id: String,
    pub amm_authority: String,
    pub amm_open_orders: String,
    pub amm_target_orders: String,
    pub base_mint: String,
    pub quote_mint: String,
    pub base_vault: String,
    pub quote_vault: String,
    pub market_program_id: String,
    pub market_id: String,
    pub market_bids: String,
    pub market_asks: String,
    pub market_event_queue: String,
    pub market_base_vault: String,
    pub market_quote_vault: String,
    pub market_authority: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityRelayConfig {
    #[serde(default = "default_block_engine_url")]
    pub url: String,

    /// Accounts a tip transfer may be sent to
    #[serde(default = "default_tip_accounts")]
    pub tip_accounts: Vec<String>,

    #[serde(default)]
    pub auth_uuid: Option<String>,

    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostedRelayConfig {
    #[serde(default = "default_hosted_relay_url")]
    pub url: String,

    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    #[serde(default = "default_settlement_commitment")]
    pub commitment: String,

    /// Confirmation budget in seconds
    #[serde(default = "default_settlement_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Fetch fee and balance deltas after confirmation
    #[serde(default = "default_true")]
    pub fetch_balance_changes: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyTradeConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Stream of leader trade signals
    #[serde(default = "default_signal_stream")]
    pub signal_stream: String,

    #[serde(default = "default_signal_group")]
    pub consumer_group: String,

    #[serde(default)]
    pub rules: Vec<CopyTradeRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Emit JSON log lines instead of the human-readable format
    #[serde(default)]
    pub json_logs: bool,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions
fn default_rpc_endpoint() -> String { "https://api.mainnet-beta.solana.com".to_string() }
fn default_rpc_timeout() -> u64 { 30 }
fn default_rpc_commitment() -> String { "confirmed".to_string() }
fn default_redis_url() -> String { "redis://127.0.0.1:6379".to_string() }
fn default_max_concurrent_runs() -> usize { 10 }
fn default_readers() -> usize { 3 }
fn default_stale_after_secs() -> u64 { 15 }
fn default_read_batch_size() -> usize { 10 }
fn default_read_block_ms() -> u64 { 2_000 }
fn default_claim_idle_ms() -> u64 { 60_000 }
fn default_admission_buffer() -> usize { 64 }
fn default_retry_attempts() -> u32 { 3 }
fn default_retry_base() -> f64 { 1.5 }
fn default_retry_factor_ms() -> u64 { 100 }
fn default_retry_max_elapsed_ms() -> u64 { 2_000 }
fn default_inbound_stream() -> String { "swap_event".to_string() }
fn default_consumer_group() -> String { "trading:swap_event".to_string() }
fn default_consumer_prefix() -> String { "trading:new_swap_event".to_string() }
fn default_outbound_stream() -> String { "swap_event:result".to_string() }
fn default_outbound_maxlen() -> usize { 10_000 }
fn default_blockhash_ttl_secs() -> u64 { 30 }
fn default_blockhash_refresh_ms() -> u64 { 10_000 }
fn default_quote_url() -> String { "https://quote-api.jup.ag/v6".to_string() }
fn default_limit_url() -> String { "https://api.jup.ag/limit/v2".to_string() }
fn default_http_timeout_ms() -> u64 { 10_000 }
fn default_quote_rps() -> u32 { 10 }
fn default_target_ratio() -> f64 { 2.0 }
fn default_compute_unit_limit() -> u32 { 200_000 }
fn default_compute_unit_price() -> u64 { 100_000 }
fn default_block_engine_url() -> String { "https://mainnet.block-engine.jito.wtf".to_string() }
fn default_hosted_relay_url() -> String {
    "https://gmgn.ai/defi/router/v1/sol/tx/submit_signed_transaction".to_string()
}
fn default_settlement_commitment() -> String { "finalized".to_string() }
fn default_settlement_timeout() -> u64 { 45 }
fn default_poll_interval_ms() -> u64 { 500 }
fn default_metrics_port() -> u16 { 9090 }
fn default_log_level() -> String { "info".to_string() }
fn default_signal_stream() -> String { "copytrade:signal".to_string() }
fn default_signal_group() -> String { "trading:copytrade".to_string() }
fn default_true() -> bool { true }

fn default_tip_accounts() -> Vec<String> {
    [
        "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5",
        "HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe",
        "Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY",
        "ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49",
        "DfXygSm4jCyNCybVYYK6DwvWqjKee8pbDmJGcLWNDXjh",
        "ADuUkR4vqLUMWXxW9gh6D6L8pMSawimctcNZ5pGwDcEt",
        "DttWaMuVvTiduZRnguLF7jNxTgiMBZ1hyAumKUiL2KRL",
        "3AVi9Tg9Uo68tJfuvoKvqKNWKkC5wPdSSdeBnizKZ6jT",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Parse a commitment name as used in config files
pub fn parse_commitment(value: &str) -> Result<CommitmentLevel> {
    match value.to_ascii_lowercase().as_str() {
        "processed" => Ok(CommitmentLevel::Processed),
        "confirmed" => Ok(CommitmentLevel::Confirmed),
        "finalized" => Ok(CommitmentLevel::Finalized),
        other => anyhow::bail!("Unknown commitment level: {}", other),
    }
}

impl Config {
    /// Load configuration from a TOML file with environment overrides
    pub fn load(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();
        let settings = config::Config::builder()
            .add_source(config::File::from(Path::new(path)).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix("TRADING")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;
        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without environment layering
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_concurrent_runs == 0 {
            anyhow::bail!("engine.max_concurrent_runs must be at least 1");
        }
        if self.engine.readers == 0 {
            anyhow::bail!("engine.readers must be at least 1");
        }
        if self.engine.retry.max_attempts == 0 {
            anyhow::bail!("engine.retry.max_attempts must be at least 1");
        }
        if self.engine.retry.base < 1.0 {
            anyhow::bail!("engine.retry.base must be >= 1.0");
        }
        if self.cache.blockhash_ttl_secs == 0 {
            anyhow::bail!("cache.blockhash_ttl_secs must be positive");
        }
        if !(self.limit_order.target_ratio.is_finite() && self.limit_order.target_ratio > 0.0) {
            anyhow::bail!("limit_order.target_ratio must be a positive number");
        }
        if self.priority_relay.tip_accounts.is_empty() {
            anyhow::bail!("priority_relay.tip_accounts must not be empty");
        }
        if self.settlement.poll_interval_ms == 0 {
            anyhow::bail!("settlement.poll_interval_ms must be positive");
        }
        parse_commitment(&self.rpc.commitment).context("rpc.commitment")?;
        parse_commitment(&self.settlement.commitment).context("settlement.commitment")?;
        Ok(())
    }
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_rpc_endpoint(),
            timeout_secs: default_rpc_timeout(),
            commitment: default_rpc_commitment(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            builder: BuilderKind::default(),
            default_sender: SenderKind::default(),
            preflight_check: default_true(),
            simulate_before_send: false,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: default_max_concurrent_runs(),
            readers: default_readers(),
            stale_after_secs: default_stale_after_secs(),
            read_batch_size: default_read_batch_size(),
            read_block_ms: default_read_block_ms(),
            claim_idle_ms: default_claim_idle_ms(),
            admission_buffer: default_admission_buffer(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base: default_retry_base(),
            factor_ms: default_retry_factor_ms(),
            max_elapsed_ms: default_retry_max_elapsed_ms(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            inbound_stream: default_inbound_stream(),
            consumer_group: default_consumer_group(),
            consumer_prefix: default_consumer_prefix(),
            outbound_stream: default_outbound_stream(),
            outbound_maxlen: default_outbound_maxlen(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            blockhash_ttl_secs: default_blockhash_ttl_secs(),
            blockhash_refresh_ms: default_blockhash_refresh_ms(),
        }
    }
}

impl Default for AmmRoutedConfig {
    fn default() -> Self {
        Self {
            base_url: default_quote_url(),
            timeout_ms: default_http_timeout_ms(),
            rate_limit_rps: default_quote_rps(),
        }
    }
}

impl Default for LimitOrderConfig {
    fn default() -> Self {
        Self {
            base_url: default_limit_url(),
            target_ratio: default_target_ratio(),
            compute_unit_price: None,
            api_key: None,
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

impl Default for DirectPoolConfig {
    fn default() -> Self {
        Self {
            compute_unit_limit: default_compute_unit_limit(),
            compute_unit_price_micro_lamports: default_compute_unit_price(),
            pools: Vec::new(),
        }
    }
}

impl Default for PriorityRelayConfig {
    fn default() -> Self {
        Self {
            url: default_block_engine_url(),
            tip_accounts: default_tip_accounts(),
            auth_uuid: None,
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

impl Default for HostedRelayConfig {
    fn default() -> Self {
        Self {
            url: default_hosted_relay_url(),
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            commitment: default_settlement_commitment(),
            timeout_secs: default_settlement_timeout(),
            poll_interval_ms: default_poll_interval_ms(),
            fetch_balance_changes: default_true(),
        }
    }
}

impl Default for CopyTradeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            signal_stream: default_signal_stream(),
            consumer_group: default_signal_group(),
            rules: Vec::new(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: default_true(),
            metrics_port: default_metrics_port(),
            json_logs: false,
            log_level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.engine.max_concurrent_runs, 10);
        assert_eq!(config.engine.readers, 3);
        assert_eq!(config.engine.stale_after_secs, 15);
        assert_eq!(config.engine.retry.max_attempts, 3);
        assert_eq!(config.cache.blockhash_ttl_secs, 30);
        assert_eq!(config.stream.consumer_group, "trading:swap_event");
        assert_eq!(config.stream.outbound_stream, "swap_event:result");
        assert_eq!(config.stream.outbound_maxlen, 10_000);
        assert_eq!(config.trading.builder, BuilderKind::AmmRouted);
        assert_eq!(config.trading.default_sender, SenderKind::Default);
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = Config::from_toml_str(
            r#"
            [trading]
            builder = "limit_order"
            default_sender = "hosted_relay"
            preflight_check = false

            [engine]
            max_concurrent_runs = 4

            [stream]
            backend = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(config.trading.builder, BuilderKind::LimitOrder);
        assert_eq!(config.trading.default_sender, SenderKind::HostedRelay);
        assert!(!config.trading.preflight_check);
        assert_eq!(config.engine.max_concurrent_runs, 4);
        assert_eq!(config.engine.readers, 3);
        assert_eq!(config.stream.backend, Backend::Memory);
    }

    #[test]
    fn test_copytrade_rules() {
        let config = Config::from_toml_str(
            r#"
            [copytrade]
            enabled = true

            [[copytrade.rules]]
            leader = "Leader111"
            follower = "Follower111"
            buy_amount_sol = 0.25
            use_priority_relay = true
            priority_fee = 0.0005
            "#,
        )
        .unwrap();
        assert!(config.copytrade.enabled);
        assert_eq!(config.copytrade.signal_stream, "copytrade:signal");
        assert_eq!(config.copytrade.rules.len(), 1);
        assert_eq!(config.copytrade.rules[0].slippage_bps, 100);
    }

    #[test]
    fn test_validation_rejects_zero_gate() {
        let err = Config::from_toml_str("[engine]\nmax_concurrent_runs = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_concurrent_runs"));
    }

    #[test]
    fn test_validation_rejects_unknown_commitment() {
        assert!(Config::from_toml_str("[settlement]\ncommitment = \"eventually\"\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[rpc]\nendpoint = \"http://localhost:8899\"\n").unwrap();
        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.rpc.endpoint, "http://localhost:8899");
        assert_eq!(config.settlement.commitment, "finalized");
    }
}

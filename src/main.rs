//! Trading - swap execution service
//!
//! Wires the stream readers, builders, senders, settlement and the result
//! publisher together from one config file, then runs the engine until
//! ctrl-c. With the memory backend nothing leaves the process except RPC
//! calls, which is useful for smoke tests against a local validator.

use anyhow::{Context, Result};
use clap::Parser;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trading::cache::{BlockhashCache, CacheStore, MemoryCacheStore, RedisCacheStore, TokenMetadataCache};
use trading::config::{parse_commitment, Backend, Config};
use trading::copytrade::CopyTradeCoordinator;
use trading::endpoints;
use trading::engine::{Engine, EngineSettings, RetryPolicy, SwapPipeline};
use trading::publisher::ResultPublisher;
use trading::rpc_manager::{RpcGateway, SolanaRpcGateway};
use trading::sender::SenderRouter;
use trading::settlement::SettlementProcessor;
use trading::stream::{IntentSource, MemoryStream, RedisIntentSource, RedisStreamSink, StreamSink};
use trading::tx_builder::{BuildContext, BuilderRouter};
use trading::wallet::WalletManager;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log filter, overrides monitoring.log_level
    #[arg(long, env = "TRADING_LOG")]
    log_level: Option<String>,

    /// Metrics port, overrides monitoring.metrics_port
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Use in-process streams and cache instead of Redis
    #[arg(long)]
    dry_run: bool,
}

/// Stream and cache handles for the selected backend
struct Backends {
    sources: Vec<Arc<dyn IntentSource>>,
    results: Arc<dyn StreamSink>,
    inbound: Arc<dyn StreamSink>,
    store: Arc<dyn CacheStore>,
    signals: Option<Arc<dyn IntentSource>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = load_config(&args.config)?;
    if args.dry_run {
        config.stream.backend = Backend::Memory;
    }
    if let Some(port) = args.metrics_port {
        config.monitoring.metrics_port = port;
    }

    init_logging(
        args.log_level.as_deref().unwrap_or(&config.monitoring.log_level),
        config.monitoring.json_logs,
    )?;
    info!(version = env!("CARGO_PKG_VERSION"), config = %args.config, "Starting trading engine");

    let wallet = Arc::new(load_wallet(&config)?);
    info!(wallets = wallet.len(), "Wallets loaded");

    let rpc: Arc<dyn RpcGateway> = Arc::new(SolanaRpcGateway::new(
        &config.rpc.endpoint,
        config.rpc.timeout(),
        parse_commitment(&config.rpc.commitment)?,
    ));

    let backends = open_backends(&config).await?;

    let blockhash = Arc::new(BlockhashCache::new(
        backends.store.clone(),
        rpc.clone(),
        Duration::from_secs(config.cache.blockhash_ttl_secs),
    ));
    let tokens = Arc::new(TokenMetadataCache::new(rpc.clone()));
    let ctx = BuildContext::new(wallet, tokens, blockhash.clone(), rpc.clone());

    let builders = BuilderRouter::from_config(ctx, &config).context("Failed to configure builders")?;
    let senders = SenderRouter::from_config(&config, rpc.clone()).context("Failed to configure senders")?;
    let settlement =
        SettlementProcessor::from_config(rpc.clone(), &config.settlement).context("Failed to configure settlement")?;
    info!(
        builder = %builders.default_kind(),
        sender = %config.trading.default_sender,
        commitment = ?settlement.commitment(),
        "Pipeline configured"
    );

    let pipeline = SwapPipeline::new(
        Arc::new(builders),
        Arc::new(senders),
        Arc::new(settlement),
        RetryPolicy::from(&config.engine.retry),
    )
    .with_simulation(config.trading.simulate_before_send);

    let engine = Engine::new(
        backends.sources,
        Arc::new(pipeline),
        Arc::new(ResultPublisher::new(backends.results)),
        EngineSettings::from(&config.engine),
    );
    let shutdown = engine.shutdown_handle();

    let refresher = blockhash.spawn_refresher(
        Duration::from_millis(config.cache.blockhash_refresh_ms),
        shutdown.subscribe(),
    );

    if config.monitoring.enable_metrics {
        let port = config.monitoring.metrics_port;
        let rx = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = endpoints::endpoint_server(port, rx).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    if config.copytrade.enabled {
        match backends.signals {
            Some(signals) => {
                let coordinator = CopyTradeCoordinator::new(config.copytrade.rules.clone(), backends.inbound)
                    .with_stale_after(Duration::from_secs(config.engine.stale_after_secs))
                    .with_claim_idle(Duration::from_millis(config.engine.claim_idle_ms));
                let rx = shutdown.subscribe();
                let batch = config.engine.read_batch_size;
                let block = Duration::from_millis(config.engine.read_block_ms);
                tokio::spawn(async move {
                    if let Err(e) = coordinator.run(signals, batch, block, rx).await {
                        error!(error = %e, "Copy trade coordinator failed");
                    }
                });
            }
            None => warn!("Copy trading enabled but no signal source is available"),
        }
    }

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            return;
        }
        info!("Received shutdown signal");
        ctrl_c.shutdown();
    });

    engine.run().await?;
    if let Err(e) = refresher.await {
        warn!(error = %e, "Blockhash refresher ended abnormally");
    }
    info!("Shut down gracefully");
    Ok(())
}

/// Initialize logging subsystem
fn init_logging(filter: &str, json: bool) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(filter))
        .context("Invalid log filter")?;

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &str) -> Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::load(path).with_context(|| format!("Failed to load config from {}", path))
    } else {
        eprintln!("Config file '{}' not found, using defaults", path);
        Ok(Config::default())
    }
}

fn load_wallet(config: &Config) -> Result<WalletManager> {
    let wallet = WalletManager::from_files(&config.wallet.keypair_paths).context("Failed to load wallet")?;
    if let Some(var) = &config.wallet.secret_key_env {
        match std::env::var(var) {
            Ok(secret) => {
                let pubkey = wallet
                    .load_base58(&secret)
                    .with_context(|| format!("Invalid secret key in {}", var))?;
                info!(wallet = %pubkey, "Loaded wallet from environment");
            }
            Err(_) => warn!(var = %var, "Wallet secret variable is not set"),
        }
    }
    if wallet.is_empty() {
        warn!("No wallets loaded, every intent will fail to sign");
    }
    Ok(wallet)
}

async fn open_backends(config: &Config) -> Result<Backends> {
    let readers = config.engine.readers;
    match config.stream.backend {
        Backend::Memory => {
            info!("Using in-process streams and cache");
            let inbound = MemoryStream::new(config.stream.inbound_stream.clone());
            let results = MemoryStream::with_maxlen(
                config.stream.outbound_stream.clone(),
                Some(config.stream.outbound_maxlen),
            );
            let signals = MemoryStream::new(config.copytrade.signal_stream.clone());
            let sources = (0..readers)
                .map(|i| {
                    Arc::new(inbound.consumer(
                        config.stream.consumer_group.clone(),
                        format!("{}:{}", config.stream.consumer_prefix, i),
                    )) as Arc<dyn IntentSource>
                })
                .collect();
            let signal_source: Arc<dyn IntentSource> = Arc::new(signals.consumer(
                config.copytrade.consumer_group.clone(),
                format!("{}:copytrade", config.stream.consumer_prefix),
            ));
            Ok(Backends {
                sources,
                results,
                inbound,
                store: Arc::new(MemoryCacheStore::new()),
                signals: Some(signal_source),
            })
        }
        Backend::Redis => {
            let client = redis::Client::open(config.redis.url.as_str()).context("Invalid redis url")?;
            let shared = ConnectionManager::new(client.clone())
                .await
                .with_context(|| format!("Failed to connect to redis at {}", config.redis.url))?;
            info!(url = %config.redis.url, "Connected to redis");

            // One connection per reader so blocking reads do not stall each other
            let mut sources: Vec<Arc<dyn IntentSource>> = Vec::with_capacity(readers);
            for i in 0..readers {
                let consumer = format!("{}:{}", config.stream.consumer_prefix, i);
                let source = RedisIntentSource::connect(
                    &client,
                    &config.stream.inbound_stream,
                    &config.stream.consumer_group,
                    &consumer,
                )
                .await?;
                sources.push(Arc::new(source));
            }
            let signals = if config.copytrade.enabled {
                let consumer = format!("{}:copytrade", config.stream.consumer_prefix);
                let source = RedisIntentSource::connect(
                    &client,
                    &config.copytrade.signal_stream,
                    &config.copytrade.consumer_group,
                    &consumer,
                )
                .await?;
                Some(Arc::new(source) as Arc<dyn IntentSource>)
            } else {
                None
            };

            Ok(Backends {
                sources,
                results: Arc::new(RedisStreamSink::new(
                    shared.clone(),
                    config.stream.outbound_stream.clone(),
                    Some(config.stream.outbound_maxlen),
                )),
                inbound: Arc::new(RedisStreamSink::new(shared.clone(), config.stream.inbound_stream.clone(), None)),
                store: Arc::new(RedisCacheStore::new(shared)),
                signals,
            })
        }
    }
}

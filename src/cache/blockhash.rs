//! Blockhash cache with a hard freshness budget
//!
//! The snapshot lives in the shared store under a fixed key with a TTL. The
//! store's own expiry is not trusted alone: every read also checks the recorded
//! fetch time, so a lagging backend can never serve a hash past the budget.
//! Concurrent misses each fetch upstream; the fetch is idempotent.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use solana_sdk::hash::Hash;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::CacheStore;
use crate::metrics::metrics;
use crate::rpc_manager::{RpcGateway, RpcManagerError};
use crate::types::BlockhashSnapshot;

pub const BLOCKHASH_KEY: &str = "blockhash";

#[derive(Debug, Serialize, Deserialize)]
struct StoredBlockhash {
    blockhash: String,
    last_valid_block_height: String,
    fetched_at: i64,
}

pub struct BlockhashCache {
    store: Arc<dyn CacheStore>,
    rpc: Arc<dyn RpcGateway>,
    ttl: Duration,
}

impl BlockhashCache {
    pub fn new(store: Arc<dyn CacheStore>, rpc: Arc<dyn RpcGateway>, ttl: Duration) -> Self {
        Self { store, rpc, ttl }
    }

    /// Latest blockhash no older than the TTL
    pub async fn get(&self) -> Result<BlockhashSnapshot, RpcManagerError> {
        if let Some(snapshot) = self.read_cached().await {
            metrics().blockhash_cache_hits.inc();
            return Ok(snapshot);
        }
        metrics().blockhash_cache_misses.inc();
        self.refresh().await
    }

    /// Fetch upstream and overwrite the shared entry
    pub async fn refresh(&self) -> Result<BlockhashSnapshot, RpcManagerError> {
        let (blockhash, last_valid_block_height) = self.rpc.get_latest_blockhash().await?;
        let snapshot = BlockhashSnapshot::new(blockhash, last_valid_block_height);

        let stored = StoredBlockhash {
            blockhash: snapshot.blockhash.to_string(),
            last_valid_block_height: snapshot.last_valid_block_height.to_string(),
            fetched_at: snapshot.fetched_at,
        };
        match serde_json::to_string(&stored) {
            Ok(value) => {
                if let Err(e) = self.store.set_ex(BLOCKHASH_KEY, &value, self.ttl).await {
                    warn!(error = %e, "Failed to write blockhash to cache");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode blockhash snapshot"),
        }

        debug!(
            blockhash = %snapshot.blockhash,
            last_valid_block_height = snapshot.last_valid_block_height,
            "Blockhash refreshed"
        );
        Ok(snapshot)
    }

    async fn read_cached(&self) -> Option<BlockhashSnapshot> {
        let raw = match self.store.get(BLOCKHASH_KEY).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "Blockhash cache read failed, fetching upstream");
                return None;
            }
        };
        let snapshot = match decode(&raw) {
            Some(s) => s,
            None => {
                warn!("Discarding undecodable blockhash cache entry");
                return None;
            }
        };
        let age_ms = snapshot.age_ms(Utc::now().timestamp_millis());
        if age_ms < 0 || age_ms as u128 >= self.ttl.as_millis() {
            return None;
        }
        Some(snapshot)
    }

    /// Keep the entry warm in the background until `shutdown` flips to true
    pub fn spawn_refresher(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if let Err(e) = self.refresh().await {
                    warn!(error = %e, "Background blockhash refresh failed");
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Blockhash refresher stopped");
        })
    }
}

fn decode(raw: &str) -> Option<BlockhashSnapshot> {
    let stored: StoredBlockhash = serde_json::from_str(raw).ok()?;
    Some(BlockhashSnapshot {
        blockhash: Hash::from_str(&stored.blockhash).ok()?,
        last_valid_block_height: stored.last_valid_block_height.parse().ok()?,
        fetched_at: stored.fetched_at,
    })
}

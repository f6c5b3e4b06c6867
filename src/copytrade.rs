//! Copy trading
//!
//! Leader trades arrive as signals on their own stream. Each signal is matched
//! against the configured rules and turned into swap intents for the followers,
//! appended to the same inbound stream the engine consumes. The coordinator is
//! a producer only; it never executes anything itself.
//!
//! Derived intents carry the signal's own timestamp, so the engine's staleness
//! check measures from the leader's trade rather than from emission. A signal
//! that fails halfway stays pending and is retried in-process from the first
//! intent not yet emitted.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::stream::{
    is_stale, message_age, now_secs, IntentSource, ReadCursor, StreamError, StreamMessage, StreamSink, DATA_FIELD,
    TIMESTAMP_FIELD,
};
use crate::tx_builder::BuilderKind;
use crate::types::{SwapDirection, SwapInType, SwapIntent};

pub const COPYTRADE_ORIGIN: &str = "copytrade";

const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(15);
const DEFAULT_CLAIM_IDLE: Duration = Duration::from_secs(60);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Follow one leader wallet with one follower wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyTradeRule {
    pub leader: String,
    pub follower: String,
    /// SOL spent per mirrored buy
    pub buy_amount_sol: f64,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u16,
    #[serde(default)]
    pub use_priority_relay: bool,
    #[serde(default)]
    pub priority_fee: Option<f64>,
    /// Mirror the leader's sells, as the same percentage of the follower's position
    #[serde(default = "default_true")]
    pub mirror_sells: bool,
    #[serde(default)]
    pub builder: Option<BuilderKind>,
}

fn default_slippage_bps() -> u16 {
    100
}

fn default_true() -> bool {
    true
}

/// A trade observed on a leader wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyTradeSignal {
    pub leader: String,
    pub direction: SwapDirection,
    pub mint: String,
    /// Share of its position the leader sold, in percent
    #[serde(default)]
    pub sell_pct: Option<f64>,
}

pub struct CopyTradeCoordinator {
    rules: HashMap<String, Vec<CopyTradeRule>>,
    sink: Arc<dyn StreamSink>,
    stale_after: Duration,
    claim_idle: Duration,
    retry_delay: Duration,
}

/// A signal emission that stopped partway
#[derive(Debug)]
pub struct PartialEmit {
    pub emitted: usize,
    pub error: StreamError,
}

impl CopyTradeCoordinator {
    pub fn new(rules: Vec<CopyTradeRule>, sink: Arc<dyn StreamSink>) -> Self {
        let mut by_leader: HashMap<String, Vec<CopyTradeRule>> = HashMap::new();
        for rule in rules {
            by_leader.entry(rule.leader.clone()).or_default().push(rule);
        }
        Self {
            rules: by_leader,
            sink,
            stale_after: DEFAULT_STALE_AFTER,
            claim_idle: DEFAULT_CLAIM_IDLE,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Signals older than this are dropped unemitted
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Idle time after which signals left pending by other consumers are taken over.
    /// Zero disables claiming.
    pub fn with_claim_idle(mut self, claim_idle: Duration) -> Self {
        self.claim_idle = claim_idle;
        self
    }

    /// Wait before re-reading signals whose emission failed
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Intents a signal produces under the configured rules
    pub fn intents_for(&self, signal: &CopyTradeSignal) -> Vec<SwapIntent> {
        let Some(rules) = self.rules.get(&signal.leader) else {
            return Vec::new();
        };
        rules
            .iter()
            .filter_map(|rule| {
                let intent = match signal.direction {
                    SwapDirection::Buy => SwapIntent::buy(&signal.mint, &rule.follower, rule.buy_amount_sol),
                    SwapDirection::Sell if rule.mirror_sells => SwapIntent::sell(
                        &signal.mint,
                        &rule.follower,
                        signal.sell_pct.unwrap_or(100.0).clamp(0.0, 100.0),
                        SwapInType::Percentage,
                    ),
                    _ => return None,
                };
                let mut intent = intent.with_slippage_bps(rule.slippage_bps).with_origin(COPYTRADE_ORIGIN);
                if rule.use_priority_relay {
                    intent = intent.with_priority_relay(rule.priority_fee);
                } else if let Some(fee) = rule.priority_fee {
                    intent = intent.with_priority_fee(fee);
                }
                if let Some(kind) = rule.builder {
                    intent = intent.with_builder(kind);
                }
                Some(intent)
            })
            .collect()
    }

    /// Append the signal's intents to the inbound stream stamped now,
    /// returning how many were emitted
    pub async fn handle_signal(&self, signal: &CopyTradeSignal) -> Result<usize, StreamError> {
        let timestamp = crate::types::unix_now().to_string();
        self.emit(signal, &timestamp, 0).await.map_err(|partial| partial.error)
    }

    /// Append the signal's intents after the first `skip`, stamped `timestamp`.
    /// Returns the total emitted so far, `skip` included.
    pub async fn emit(&self, signal: &CopyTradeSignal, timestamp: &str, skip: usize) -> Result<usize, PartialEmit> {
        let intents = self.intents_for(signal);
        let mut emitted = skip.min(intents.len());
        for intent in &intents[emitted..] {
            let appended = match serde_json::to_string(intent) {
                Ok(data) => self.sink.append_stamped(&data, timestamp).await,
                Err(e) => Err(StreamError::Encode(e.to_string())),
            };
            let id = appended.map_err(|error| PartialEmit { emitted, error })?;
            emitted += 1;
            info!(
                intent_id = %intent.id,
                leader = %signal.leader,
                follower = %intent.user_pubkey,
                direction = %intent.direction,
                mint = %signal.mint,
                entry = %id,
                "Copy trade intent emitted"
            );
        }
        Ok(emitted)
    }

    /// Consume signals until shutdown
    pub async fn run(
        self,
        source: Arc<dyn IntentSource>,
        batch_size: usize,
        block: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), StreamError> {
        source.prepare().await?;
        info!(leaders = self.rules.len(), stream = self.sink.stream(), "Copy trade coordinator started");

        // Intents already emitted for signals still pending, keyed by entry id
        let mut progress: HashMap<String, usize> = HashMap::new();
        let mut cursor = ReadCursor::Pending;
        let mut retry_at: Option<Instant> = None;
        let mut last_claim = Instant::now();
        loop {
            if *shutdown.borrow() {
                break;
            }
            if retry_at.is_some_and(|at| Instant::now() >= at) {
                retry_at = None;
                cursor = ReadCursor::Pending;
            }
            let claim_due = !self.claim_idle.is_zero() && last_claim.elapsed() >= self.claim_idle;

            let read = if cursor == ReadCursor::Pending {
                source.read_batch(ReadCursor::Pending, batch_size, Duration::ZERO).await
            } else if claim_due {
                last_claim = Instant::now();
                source.claim_stale(self.claim_idle, batch_size).await
            } else {
                let wait = match retry_at {
                    Some(at) => block.min(at.saturating_duration_since(Instant::now())),
                    None => block,
                };
                tokio::select! {
                    _ = shutdown.changed() => break,
                    read = source.read_batch(ReadCursor::New, batch_size, wait) => read,
                }
            };
            cursor = ReadCursor::New;
            let batch = match read {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "Signal read failed");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                    continue;
                }
            };

            for message in batch {
                let done = self.process(&message, &mut progress).await;
                if !done {
                    retry_at.get_or_insert_with(|| Instant::now() + self.retry_delay);
                    continue;
                }
                progress.remove(&message.id);
                if let Err(e) = source.ack(&message.id).await {
                    warn!(entry = %message.id, error = %e, "Failed to ack signal");
                }
            }
        }
        debug!("Copy trade coordinator stopped");
        Ok(())
    }

    /// Handle one signal entry; `false` leaves it pending for a retry
    async fn process(&self, message: &StreamMessage, progress: &mut HashMap<String, usize>) -> bool {
        let age_secs = message_age(message, now_secs());
        if is_stale(age_secs, self.stale_after) {
            warn!(entry = %message.id, ?age_secs, "Dropping stale signal");
            return true;
        }
        let signal = message
            .field(DATA_FIELD)
            .ok_or_else(|| "missing data field".to_string())
            .and_then(|d| serde_json::from_str::<CopyTradeSignal>(d).map_err(|e| e.to_string()));
        let signal = match signal {
            Ok(signal) => signal,
            Err(reason) => {
                error!(entry = %message.id, error = %reason, "Dropping malformed signal");
                return true;
            }
        };

        let timestamp = message.field(TIMESTAMP_FIELD).unwrap_or_default();
        let skip = progress.get(&message.id).copied().unwrap_or(0);
        match self.emit(&signal, timestamp, skip).await {
            Ok(_) => true,
            Err(partial) => {
                error!(
                    entry = %message.id,
                    emitted = partial.emitted,
                    error = %partial.error,
                    "Failed to emit copy trade intents"
                );
                progress.insert(message.id.clone(), partial.emitted);
                false
            }
        }
    }
}

//! Engine: stream readers, the admission gate and graceful shutdown
//!
//! Readers pull from the inbound group and push decoded intents into a bounded
//! admission channel. The dispatcher admits an intent only once it holds a gate
//! permit, then runs it in a `JoinSet`. A run publishes its result and only then
//! acks the inbound entry, so anything not acked is redelivered.
//!
//! On shutdown, readers stop, nothing further is admitted and admitted runs are
//! awaited. Intents still sitting in the admission channel are dropped unacked.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub mod pipeline;
pub mod retry;

pub use pipeline::{IntentExecutor, SwapPipeline};
pub use retry::RetryPolicy;

use crate::config::EngineConfig;
use crate::metrics::metrics;
use crate::publisher::ResultPublisher;
use crate::stream::{classify, now_secs, Inbound, IntentSource, ReadCursor, StreamMessage};
use crate::types::{PipelineStage, SwapIntent, SwapResult};

/// Back-off after a failed stream read
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_concurrent_runs: usize,
    pub stale_after: Duration,
    pub read_batch_size: usize,
    pub read_block: Duration,
    pub claim_idle: Duration,
    pub admission_buffer: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(c: &EngineConfig) -> Self {
        Self {
            max_concurrent_runs: c.max_concurrent_runs.max(1),
            stale_after: Duration::from_secs(c.stale_after_secs),
            read_batch_size: c.read_batch_size.max(1),
            read_block: Duration::from_millis(c.read_block_ms),
            claim_idle: Duration::from_millis(c.claim_idle_ms),
            admission_buffer: c.admission_buffer.max(1),
        }
    }
}

/// Counters of one engine instance
#[derive(Debug, Default)]
pub struct EngineStats {
    pub admitted: AtomicU64,
    pub completed: AtomicU64,
    pub stale_discarded: AtomicU64,
    pub malformed: AtomicU64,
    pub panics: AtomicU64,
    pub inflight: AtomicU64,
    pub peak_inflight: AtomicU64,
}

impl EngineStats {
    fn enter(&self) {
        let now = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_inflight.fetch_max(now, Ordering::SeqCst);
        metrics().inflight_runs.inc();
    }

    fn exit(&self) {
        self.inflight.fetch_sub(1, Ordering::SeqCst);
        metrics().inflight_runs.dec();
    }
}

/// Triggers graceful shutdown of a running engine
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// A decoded intent waiting for a permit
struct Admission {
    source: Arc<dyn IntentSource>,
    message_id: String,
    intent: SwapIntent,
}

pub struct Engine {
    sources: Vec<Arc<dyn IntentSource>>,
    executor: Arc<dyn IntentExecutor>,
    publisher: Arc<ResultPublisher>,
    settings: EngineSettings,
    gate: Arc<Semaphore>,
    stats: Arc<EngineStats>,
    shutdown: ShutdownHandle,
}

impl Engine {
    pub fn new(
        sources: Vec<Arc<dyn IntentSource>>,
        executor: Arc<dyn IntentExecutor>,
        publisher: Arc<ResultPublisher>,
        settings: EngineSettings,
    ) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            sources,
            executor,
            publisher,
            gate: Arc::new(Semaphore::new(settings.max_concurrent_runs)),
            settings,
            stats: Arc::new(EngineStats::default()),
            shutdown: ShutdownHandle { tx: Arc::new(tx) },
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    /// Run until shutdown. Only failing to prepare a consumer group is an error.
    pub async fn run(self) -> anyhow::Result<()> {
        for source in &self.sources {
            source.prepare().await?;
        }
        info!(
            readers = self.sources.len(),
            max_concurrent_runs = self.settings.max_concurrent_runs,
            "Engine started"
        );

        let (admit_tx, mut admit_rx) = mpsc::channel::<Admission>(self.settings.admission_buffer);
        let readers: Vec<JoinHandle<()>> = self
            .sources
            .iter()
            .map(|source| {
                tokio::spawn(reader_loop(
                    Arc::clone(source),
                    admit_tx.clone(),
                    self.shutdown.subscribe(),
                    self.settings.clone(),
                    Arc::clone(&self.stats),
                ))
            })
            .collect();
        drop(admit_tx);

        let mut shutdown = self.shutdown.subscribe();
        let mut runs = JoinSet::new();
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(joined) = runs.join_next(), if !runs.is_empty() => log_join(joined),
                admission = admit_rx.recv() => {
                    let Some(admission) = admission else { break };
                    let permit = tokio::select! {
                        biased;
                        _ = shutdown.changed() => {
                            debug!(intent_id = %admission.intent.id, "Shutdown before admission, leaving unacked");
                            break;
                        }
                        permit = Arc::clone(&self.gate).acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => break,
                        },
                    };
                    self.stats.admitted.fetch_add(1, Ordering::Relaxed);
                    runs.spawn(run_one(
                        admission,
                        permit,
                        Arc::clone(&self.executor),
                        Arc::clone(&self.publisher),
                        Arc::clone(&self.stats),
                    ));
                }
            }
        }

        info!(inflight = runs.len(), "Engine stopping, draining admitted runs");
        self.shutdown.shutdown();
        drop(admit_rx);
        for reader in readers {
            if let Err(e) = reader.await {
                warn!(error = %e, "Reader task ended abnormally");
            }
        }
        while let Some(joined) = runs.join_next().await {
            log_join(joined);
        }
        info!(
            completed = self.stats.completed.load(Ordering::Relaxed),
            "Engine stopped"
        );
        Ok(())
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Run task failed to join");
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Execute, publish, then ack
async fn run_one(
    admission: Admission,
    _permit: OwnedSemaphorePermit,
    executor: Arc<dyn IntentExecutor>,
    publisher: Arc<ResultPublisher>,
    stats: Arc<EngineStats>,
) {
    stats.enter();
    let _inflight = scopeguard::guard(Arc::clone(&stats), |stats| stats.exit());

    let Admission {
        source,
        message_id,
        intent,
    } = admission;
    let intent_id = intent.id;

    let result = match AssertUnwindSafe(executor.execute(intent.clone())).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let reason = format!("run panicked: {}", panic_message(payload.as_ref()));
            stats.panics.fetch_add(1, Ordering::Relaxed);
            metrics().run_panics.inc();
            metrics().swaps_failed.inc();
            error!(context_id = %intent_id, error = %reason, "Pipeline run panicked");
            SwapResult::failed(intent, PipelineStage::Unknown, reason)
        }
    };

    publisher.publish(&result).await;
    if let Err(e) = source.ack(&message_id).await {
        warn!(intent_id = %intent_id, entry = %message_id, error = %e, "Failed to ack inbound entry");
    }
    stats.completed.fetch_add(1, Ordering::Relaxed);
}

/// Ack an entry that will never run
async fn discard(source: &dyn IntentSource, message: &StreamMessage) {
    if let Err(e) = source.ack(&message.id).await {
        warn!(consumer = source.name(), entry = %message.id, error = %e, "Failed to ack discarded entry");
    }
}

async fn reader_loop(
    source: Arc<dyn IntentSource>,
    admit: mpsc::Sender<Admission>,
    mut shutdown: watch::Receiver<bool>,
    settings: EngineSettings,
    stats: Arc<EngineStats>,
) {
    let consumer = source.name().to_string();
    debug!(consumer = %consumer, "Reader started");

    let mut cursor = ReadCursor::Pending;
    let mut last_claim = Instant::now();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let claim_due = !settings.claim_idle.is_zero() && last_claim.elapsed() >= settings.claim_idle;
        let read = if cursor == ReadCursor::Pending {
            source.read_batch(ReadCursor::Pending, settings.read_batch_size, Duration::ZERO).await
        } else if claim_due {
            last_claim = Instant::now();
            source.claim_stale(settings.claim_idle, settings.read_batch_size).await
        } else {
            tokio::select! {
                _ = shutdown.changed() => break,
                read = source.read_batch(ReadCursor::New, settings.read_batch_size, settings.read_block) => read,
            }
        };

        let batch = match read {
            Ok(batch) => batch,
            Err(e) => {
                warn!(consumer = %consumer, error = %e, "Stream read failed");
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(READ_ERROR_BACKOFF) => {}
                }
                continue;
            }
        };
        // Own pending entries are replayed once, then only new ones are read
        if cursor == ReadCursor::Pending {
            if !batch.is_empty() {
                info!(consumer = %consumer, count = batch.len(), "Replaying pending entries");
            }
            cursor = ReadCursor::New;
        }

        for message in batch {
            match classify(&message, now_secs(), settings.stale_after) {
                Inbound::Intent(intent) => {
                    metrics().intents_received.inc();
                    let admission = Admission {
                        source: Arc::clone(&source),
                        message_id: message.id,
                        intent,
                    };
                    tokio::select! {
                        _ = shutdown.changed() => {
                            debug!(consumer = %consumer, "Reader stopped");
                            return;
                        }
                        sent = admit.send(admission) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                }
                Inbound::Stale { age_secs } => {
                    stats.stale_discarded.fetch_add(1, Ordering::Relaxed);
                    metrics().intents_stale_discarded.inc();
                    debug!(consumer = %consumer, entry = %message.id, ?age_secs, "Discarding stale entry");
                    discard(source.as_ref(), &message).await;
                }
                Inbound::Malformed(reason) => {
                    stats.malformed.fetch_add(1, Ordering::Relaxed);
                    metrics().intents_malformed.inc();
                    error!(consumer = %consumer, entry = %message.id, error = %reason, "Dropping malformed entry");
                    discard(source.as_ref(), &message).await;
                }
            }
        }
    }
    debug!(consumer = %consumer, "Reader stopped");
}

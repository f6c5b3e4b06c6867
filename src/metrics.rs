//! Metrics collection and export module

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::time::Instant;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Intake
    pub intents_received: IntCounter,
    pub intents_stale_discarded: IntCounter,
    pub intents_malformed: IntCounter,

    // Outcomes
    pub swaps_confirmed: IntCounter,
    pub swaps_failed: IntCounter,
    pub swaps_unknown: IntCounter,
    pub run_panics: IntCounter,
    pub submit_retries: IntCounter,
    pub publish_failures: IntCounter,

    // Caches
    pub blockhash_cache_hits: IntCounter,
    pub blockhash_cache_misses: IntCounter,
    pub token_cache_hits: IntCounter,
    pub token_cache_misses: IntCounter,

    // Gauges
    pub inflight_runs: IntGauge,

    // Histograms
    pub pipeline_latency: Histogram,
    pub build_latency: Histogram,
    pub send_latency: Histogram,
    pub confirm_latency: Histogram,
    pub rpc_latency: Histogram,
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let c = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

fn histogram(registry: &Registry, name: &str, help: &str, buckets: Vec<f64>) -> prometheus::Result<Histogram> {
    let h = Histogram::with_opts(HistogramOpts::new(name, help).buckets(buckets))?;
    registry.register(Box::new(h.clone()))?;
    Ok(h)
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let inflight_runs = IntGauge::with_opts(Opts::new(
            "inflight_runs",
            "Pipeline runs currently holding an admission permit",
        ))?;
        registry.register(Box::new(inflight_runs.clone()))?;

        Ok(Self {
            intents_received: counter(&registry, "intents_received_total", "Swap intents read from the inbound stream")?,
            intents_stale_discarded: counter(
                &registry,
                "intents_stale_discarded_total",
                "Intents acknowledged and dropped for exceeding the staleness budget",
            )?,
            intents_malformed: counter(&registry, "intents_malformed_total", "Inbound messages that could not be decoded")?,
            swaps_confirmed: counter(&registry, "swaps_confirmed_total", "Swaps confirmed on-chain")?,
            swaps_failed: counter(&registry, "swaps_failed_total", "Swaps that failed before or after submission")?,
            swaps_unknown: counter(&registry, "swaps_unknown_total", "Swaps submitted but not confirmed within budget")?,
            run_panics: counter(&registry, "run_panics_total", "Pipeline runs that panicked")?,
            submit_retries: counter(&registry, "submit_retries_total", "Submission attempts retried after transient errors")?,
            publish_failures: counter(&registry, "publish_failures_total", "Results that could not be written to the outbound stream")?,
            blockhash_cache_hits: counter(&registry, "blockhash_cache_hits_total", "Blockhash served from cache")?,
            blockhash_cache_misses: counter(&registry, "blockhash_cache_misses_total", "Blockhash fetched upstream")?,
            token_cache_hits: counter(&registry, "token_cache_hits_total", "Token metadata served from cache")?,
            token_cache_misses: counter(&registry, "token_cache_misses_total", "Token metadata fetched upstream")?,
            inflight_runs,
            pipeline_latency: histogram(
                &registry,
                "pipeline_latency_seconds",
                "Received to settled latency",
                vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 45.0, 90.0],
            )?,
            build_latency: histogram(
                &registry,
                "build_latency_seconds",
                "Transaction build latency",
                vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0],
            )?,
            send_latency: histogram(
                &registry,
                "send_latency_seconds",
                "Submission latency including retries",
                vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0],
            )?,
            confirm_latency: histogram(
                &registry,
                "confirm_latency_seconds",
                "Submission to settlement latency",
                vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 45.0, 90.0],
            )?,
            rpc_latency: histogram(
                &registry,
                "rpc_latency_seconds",
                "RPC call latency",
                vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0],
            )?,
            registry,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.start.elapsed().as_secs_f64());
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

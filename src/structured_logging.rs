//! Structured logging and pipeline context

use std::time::Instant;

use crate::observability::CorrelationId;
use crate::types::{PipelineStage, SettlementRecord, SwapIntent};

/// Structured logger for pipeline events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    context_id: CorrelationId,
}

impl StructuredLogger {
    pub fn new(context_id: CorrelationId) -> Self {
        Self { context_id }
    }

    pub fn log_received(&self, intent: &SwapIntent) {
        tracing::info!(
            context_id = %self.context_id,
            intent_id = %intent.id,
            direction = %intent.direction,
            mint = %intent.token_mint(),
            amount = %intent.amount,
            user = %intent.user_pubkey,
            priority_relay = %intent.use_priority_relay,
            "Swap intent received"
        );
    }

    pub fn log_stage(&self, stage: PipelineStage) {
        tracing::debug!(
            context_id = %self.context_id,
            stage = %stage,
            "Pipeline stage"
        );
    }

    pub fn log_submitted(&self, signature: &str, attempts: u32, latency_ms: u64) {
        tracing::info!(
            context_id = %self.context_id,
            signature = %signature,
            attempts = %attempts,
            latency_ms = %latency_ms,
            "Transaction submitted"
        );
    }

    pub fn log_settled(&self, record: &SettlementRecord, latency_ms: u64) {
        tracing::info!(
            context_id = %self.context_id,
            signature = %record.signature,
            status = ?record.status,
            slot = ?record.slot,
            latency_ms = %latency_ms,
            "Swap settled"
        );
    }

    pub fn log_failure(&self, stage: PipelineStage, error: &str) {
        tracing::warn!(
            context_id = %self.context_id,
            stage = %stage,
            error = %error,
            "Swap failed"
        );
    }
}

/// Per-run execution context
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub correlation_id: CorrelationId,
    pub started: Instant,
    pub logger: StructuredLogger,
}

impl PipelineContext {
    /// Context keyed on the intent id so logs line up with the published result
    pub fn for_intent(intent: &SwapIntent) -> Self {
        let correlation_id = CorrelationId::from(intent.id);
        Self {
            logger: StructuredLogger::new(correlation_id.clone()),
            correlation_id,
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

//! One intent through Building, Sending and Confirming
//!
//! Every path ends in exactly one [`SwapResult`]. Failures before submission
//! carry no hash; once a signature exists it is always reported, whatever
//! settlement concludes.

use async_trait::async_trait;
use std::sync::Arc;

use super::retry::{retry_transient, RetryPolicy};
use crate::metrics::{metrics, Timer};
use crate::sender::SenderRouter;
use crate::settlement::SettlementProcessor;
use crate::structured_logging::PipelineContext;
use crate::tx_builder::BuilderRouter;
use crate::types::{unix_now, PipelineStage, SettlementStatus, SubmissionReceipt, SwapIntent, SwapResult};

/// Executes one admitted intent to its terminal result
#[async_trait]
pub trait IntentExecutor: Send + Sync {
    async fn execute(&self, intent: SwapIntent) -> SwapResult;
}

pub struct SwapPipeline {
    builders: Arc<BuilderRouter>,
    senders: Arc<SenderRouter>,
    settlement: Arc<SettlementProcessor>,
    retry: RetryPolicy,
    simulate_before_send: bool,
}

impl SwapPipeline {
    pub fn new(
        builders: Arc<BuilderRouter>,
        senders: Arc<SenderRouter>,
        settlement: Arc<SettlementProcessor>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            builders,
            senders,
            settlement,
            retry,
            simulate_before_send: false,
        }
    }

    pub fn with_simulation(mut self, enabled: bool) -> Self {
        self.simulate_before_send = enabled;
        self
    }

    fn fail(ctx: &PipelineContext, intent: SwapIntent, stage: PipelineStage, reason: String) -> SwapResult {
        metrics().swaps_failed.inc();
        ctx.logger.log_failure(stage, &reason);
        SwapResult::failed(intent, stage, reason)
    }
}

#[async_trait]
impl IntentExecutor for SwapPipeline {
    async fn execute(&self, intent: SwapIntent) -> SwapResult {
        let ctx = PipelineContext::for_intent(&intent);
        ctx.logger.log_received(&intent);

        // Building
        ctx.logger.log_stage(PipelineStage::Building);
        let timer = Timer::new();
        let built = match self.builders.build(&intent).await {
            Ok(built) => built,
            Err(e) => {
                tracing::debug!(category = e.category(), validation = e.is_validation(), "Build rejected");
                return Self::fail(&ctx, intent, PipelineStage::Building, e.to_string());
            }
        };
        timer.observe_duration(&metrics().build_latency);

        // Sending
        ctx.logger.log_stage(PipelineStage::Sending);
        let sender = match self.senders.select(&intent) {
            Ok(sender) => sender,
            Err(e) => return Self::fail(&ctx, intent, PipelineStage::Sending, e.to_string()),
        };
        if self.simulate_before_send && sender.supports_simulation() {
            match sender.simulate(&built.transaction).await {
                Ok(true) => {}
                Ok(false) => {
                    return Self::fail(&ctx, intent, PipelineStage::Sending, "simulation failed".to_string())
                }
                Err(e) => {
                    return Self::fail(&ctx, intent, PipelineStage::Sending, format!("simulation: {e}"))
                }
            }
        }

        let timer = Timer::new();
        let tx = &built.transaction;
        let sender_ref = sender.as_ref();
        let attempted = retry_transient(&self.retry, |_| sender_ref.send(tx)).await;
        let signature = match attempted.result {
            Ok(signature) => signature,
            Err(e) => {
                let reason = format!("{e} after {} attempt(s)", attempted.attempts);
                return Self::fail(&ctx, intent, PipelineStage::Sending, reason);
            }
        };
        timer.observe_duration(&metrics().send_latency);
        ctx.logger
            .log_submitted(&signature.to_string(), attempted.attempts, timer.elapsed_ms());
        let receipt = SubmissionReceipt {
            signature: Some(signature.to_string()),
            submitted_at: unix_now(),
        };

        // Confirming
        ctx.logger.log_stage(PipelineStage::Confirming);
        let timer = Timer::new();
        let record = self.settlement.settle(&signature, &intent).await;
        timer.observe_duration(&metrics().confirm_latency);
        match record.status {
            SettlementStatus::Confirmed => metrics().swaps_confirmed.inc(),
            SettlementStatus::Failed => metrics().swaps_failed.inc(),
            SettlementStatus::Unknown => metrics().swaps_unknown.inc(),
        }
        ctx.logger.log_settled(&record, ctx.elapsed_ms());
        metrics()
            .pipeline_latency
            .observe(ctx.started.elapsed().as_secs_f64());

        SwapResult::settled(intent, receipt, record)
    }
}

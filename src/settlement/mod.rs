//! Settlement: turning a submitted signature into a terminal record
//!
//! Polls signature status until the configured commitment is reached or the
//! confirmation budget runs out. Running out is not a failure of the swap: the
//! record is `Unknown` and keeps the real signature so the outcome can be
//! reconciled later. Every RPC call made here is bounded by what is left of
//! the budget.

use solana_sdk::{commitment_config::CommitmentLevel, signature::Signature};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::config::{parse_commitment, SettlementConfig};
use crate::metrics::metrics;
use crate::rpc_manager::RpcGateway;
use crate::types::{SettlementRecord, SwapIntent};

pub struct SettlementProcessor {
    rpc: Arc<dyn RpcGateway>,
    commitment: CommitmentLevel,
    timeout: Duration,
    poll_interval: Duration,
    fetch_balance_changes: bool,
}

impl SettlementProcessor {
    pub fn new(rpc: Arc<dyn RpcGateway>, commitment: CommitmentLevel, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            rpc,
            commitment,
            timeout,
            poll_interval,
            fetch_balance_changes: true,
        }
    }

    pub fn from_config(rpc: Arc<dyn RpcGateway>, config: &SettlementConfig) -> anyhow::Result<Self> {
        Ok(Self::new(
            rpc,
            parse_commitment(&config.commitment)?,
            Duration::from_secs(config.timeout_secs),
            Duration::from_millis(config.poll_interval_ms),
        )
        .with_balance_changes(config.fetch_balance_changes))
    }

    pub fn with_balance_changes(mut self, enabled: bool) -> Self {
        self.fetch_balance_changes = enabled;
        self
    }

    pub fn commitment(&self) -> CommitmentLevel {
        self.commitment
    }

    pub async fn settle(&self, signature: &Signature, intent: &SwapIntent) -> SettlementRecord {
        let deadline = Instant::now() + self.timeout;
        let sig = signature.to_string();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let polled = timeout(remaining, self.rpc.get_signature_status(signature, self.commitment)).await;
            match polled {
                Err(_) => {
                    warn!(signature = %sig, "Signature status poll outlived the confirmation budget");
                }
                Ok(Ok(Some(state))) if state.commitment_reached => {
                    return match state.err {
                        Some(err) => SettlementRecord::failed(sig, Some(state.slot), err),
                        None => {
                            let mut record = SettlementRecord::confirmed(sig.clone(), state.slot);
                            if self.fetch_balance_changes {
                                let remaining = deadline.saturating_duration_since(Instant::now());
                                if timeout(remaining, self.enrich(&mut record, signature, intent))
                                    .await
                                    .is_err()
                                {
                                    debug!(signature = %sig, "Balance lookup outlived the confirmation budget");
                                }
                            }
                            record
                        }
                    };
                }
                Ok(Ok(Some(state))) => {
                    debug!(signature = %sig, slot = state.slot, "Seen, commitment not reached yet");
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    warn!(signature = %sig, error = %e, "Signature status poll failed");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(signature = %sig, timeout_ms = self.timeout.as_millis() as u64, "Confirmation budget elapsed");
                return SettlementRecord::unknown(sig);
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Best effort: a missing transaction leaves the deltas unset
    async fn enrich(&self, record: &mut SettlementRecord, signature: &Signature, intent: &SwapIntent) {
        // getTransaction does not accept processed
        let commitment = match self.commitment {
            CommitmentLevel::Processed => CommitmentLevel::Confirmed,
            other => other,
        };
        let timer = crate::metrics::Timer::new();
        match self.rpc.get_transaction_balances(signature, commitment).await {
            Ok(Some(balances)) => {
                record.fee_lamports = Some(balances.fee);
                record.sol_change_lamports = balances.fee_payer_delta();
                record.token_change = Some(balances.token_delta(&intent.user_pubkey, intent.token_mint()));
            }
            Ok(None) => debug!(signature = %signature, "Transaction meta not available yet"),
            Err(e) => debug!(signature = %signature, error = %e, "Balance lookup failed"),
        }
        timer.observe_duration(&metrics().rpc_latency);
    }
}

//! Submission straight to the configured RPC node

use async_trait::async_trait;
use solana_sdk::{signature::Signature, transaction::VersionedTransaction};
use std::sync::Arc;
use tracing::debug;

use super::{SendError, SenderKind, TransactionSender};
use crate::rpc_manager::RpcGateway;

pub struct RpcSender {
    rpc: Arc<dyn RpcGateway>,
    preflight_check: bool,
}

impl RpcSender {
    pub fn new(rpc: Arc<dyn RpcGateway>, preflight_check: bool) -> Self {
        Self { rpc, preflight_check }
    }
}

#[async_trait]
impl TransactionSender for RpcSender {
    fn kind(&self) -> SenderKind {
        SenderKind::Default
    }

    fn supports_simulation(&self) -> bool {
        true
    }

    async fn send(&self, tx: &VersionedTransaction) -> Result<Signature, SendError> {
        let signature = self.rpc.send_transaction(tx, !self.preflight_check).await?;
        debug!(%signature, endpoint = self.rpc.endpoint(), "Sent via RPC");
        Ok(signature)
    }

    async fn simulate(&self, tx: &VersionedTransaction) -> Result<bool, SendError> {
        let outcome = self.rpc.simulate_transaction(tx).await?;
        if let Some(err) = &outcome.err {
            debug!(error = %err, logs = ?outcome.logs, "Simulation failed");
        }
        Ok(outcome.err.is_none())
    }
}

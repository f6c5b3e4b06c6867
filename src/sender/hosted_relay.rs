//! Hosted relay submission (GMGN)

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use solana_sdk::{signature::Signature, transaction::VersionedTransaction};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{SendError, SenderKind, TransactionSender};
use crate::rpc_manager::RpcGateway;
use crate::tx_builder::signing::encode_transaction;

#[derive(Debug, Deserialize)]
struct RelayReply {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<RelayData>,
}

#[derive(Debug, Deserialize)]
struct RelayData {
    #[serde(default)]
    hash: Option<String>,
}

pub struct HostedRelaySender {
    http: Client,
    url: String,
    rpc: Arc<dyn RpcGateway>,
}

impl HostedRelaySender {
    pub fn new(url: &str, timeout: Duration, rpc: Arc<dyn RpcGateway>) -> Result<Self, SendError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.to_string(),
            rpc,
        })
    }
}

#[async_trait]
impl TransactionSender for HostedRelaySender {
    fn kind(&self) -> SenderKind {
        SenderKind::HostedRelay
    }

    fn supports_simulation(&self) -> bool {
        true
    }

    async fn send(&self, tx: &VersionedTransaction) -> Result<Signature, SendError> {
        let encoded = encode_transaction(tx).map_err(|e| SendError::Encode(e.to_string()))?;
        let resp = self
            .http
            .post(&self.url)
            .json(&json!({ "signed_tx": encoded }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SendError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let reply: RelayReply = resp
            .json()
            .await
            .map_err(|e| SendError::InvalidResponse(e.to_string()))?;
        if reply.code != 0 {
            return Err(SendError::Rejected {
                sender: self.kind(),
                reason: format!("{} (code {})", reply.msg, reply.code),
            });
        }

        let hash = reply
            .data
            .and_then(|d| d.hash)
            .ok_or_else(|| SendError::InvalidResponse("relay reply has no hash".into()))?;
        let signature = Signature::from_str(&hash)
            .map_err(|e| SendError::InvalidResponse(format!("relay hash {hash}: {e}")))?;
        debug!(%signature, "Sent via hosted relay");
        Ok(signature)
    }

    async fn simulate(&self, tx: &VersionedTransaction) -> Result<bool, SendError> {
        Ok(self.rpc.simulate_transaction(tx).await?.err.is_none())
    }
}

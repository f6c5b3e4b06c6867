//! Jito block engine bundle submission
//!
//! The transaction goes out as a single-transaction bundle. The block engine
//! returns a bundle id; settlement tracks the transaction's own signature.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::{signature::Signature, transaction::VersionedTransaction};
use std::time::Duration;
use tracing::debug;

use super::{SendError, SenderKind, TransactionSender};
use crate::compat;
use crate::tx_builder::signing::encode_transaction;

#[derive(Debug, Deserialize)]
struct JsonRpcReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

pub struct PriorityRelaySender {
    http: Client,
    bundles_url: String,
    auth: Option<String>,
}

impl PriorityRelaySender {
    pub fn new(url: &str, auth: Option<String>, timeout: Duration) -> Result<Self, SendError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            bundles_url: format!("{}/api/v1/bundles", url.trim_end_matches('/')),
            auth,
        })
    }
}

#[async_trait]
impl TransactionSender for PriorityRelaySender {
    fn kind(&self) -> SenderKind {
        SenderKind::PriorityRelay
    }

    fn supports_simulation(&self) -> bool {
        false
    }

    async fn send(&self, tx: &VersionedTransaction) -> Result<Signature, SendError> {
        let signature = compat::first_signature(tx)
            .ok_or_else(|| SendError::Encode("transaction is not signed".into()))?;
        let encoded = encode_transaction(tx).map_err(|e| SendError::Encode(e.to_string()))?;
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "sendBundle",
            "params": [[encoded], {"encoding": "base64"}],
        });

        let mut req = self.http.post(&self.bundles_url).json(&body);
        if let Some(auth) = &self.auth {
            req = req.header("x-jito-auth", auth);
        }
        let resp = req.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SendError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let reply: JsonRpcReply = resp
            .json()
            .await
            .map_err(|e| SendError::InvalidResponse(e.to_string()))?;

        if let Some(err) = reply.error {
            return Err(SendError::Rejected {
                sender: self.kind(),
                reason: format!("{} (code {})", err.message, err.code),
            });
        }
        let bundle_id = reply
            .result
            .ok_or_else(|| SendError::InvalidResponse("sendBundle reply has no result".into()))?;
        debug!(%signature, bundle_id = %bundle_id, "Bundle accepted");
        Ok(signature)
    }

    async fn simulate(&self, _tx: &VersionedTransaction) -> Result<bool, SendError> {
        Err(SendError::Unsupported(self.kind()))
    }
}

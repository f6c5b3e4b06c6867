//! Transaction submission
//!
//! A sender hands a signed transaction to the network once. Retrying belongs to
//! the engine, which knows the wall-time budget; senders never retry internally.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_sdk::{signature::Signature, transaction::VersionedTransaction};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub mod errors;
pub mod hosted_relay;
pub mod priority_relay;
pub mod rpc_sender;

pub use errors::{SendError, TransportKind};
pub use hosted_relay::HostedRelaySender;
pub use priority_relay::PriorityRelaySender;
pub use rpc_sender::RpcSender;

use crate::config::Config;
use crate::rpc_manager::RpcGateway;
use crate::types::SwapIntent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    #[default]
    Default,
    PriorityRelay,
    HostedRelay,
}

impl fmt::Display for SenderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SenderKind::Default => write!(f, "default"),
            SenderKind::PriorityRelay => write!(f, "priority_relay"),
            SenderKind::HostedRelay => write!(f, "hosted_relay"),
        }
    }
}

#[async_trait]
pub trait TransactionSender: Send + Sync {
    fn kind(&self) -> SenderKind;

    fn supports_simulation(&self) -> bool;

    /// Submit once; the returned signature identifies the transaction for settlement
    async fn send(&self, tx: &VersionedTransaction) -> Result<Signature, SendError>;

    /// `Ok(true)` when the transaction would execute without error
    async fn simulate(&self, tx: &VersionedTransaction) -> Result<bool, SendError>;
}

/// Chooses the sender for an intent
pub struct SenderRouter {
    default: SenderKind,
    senders: HashMap<SenderKind, Arc<dyn TransactionSender>>,
}

impl SenderRouter {
    pub fn new(default: SenderKind) -> Self {
        Self {
            default,
            senders: HashMap::new(),
        }
    }

    pub fn with_sender(mut self, sender: Arc<dyn TransactionSender>) -> Self {
        self.senders.insert(sender.kind(), sender);
        self
    }

    pub fn from_config(config: &Config, rpc: Arc<dyn RpcGateway>) -> anyhow::Result<Self> {
        let relay = PriorityRelaySender::new(
            &config.priority_relay.url,
            config.priority_relay.auth_uuid.clone(),
            Duration::from_millis(config.priority_relay.timeout_ms),
        )?;
        let hosted = HostedRelaySender::new(
            &config.hosted_relay.url,
            Duration::from_millis(config.hosted_relay.timeout_ms),
            rpc.clone(),
        )?;
        Ok(Self::new(config.trading.default_sender)
            .with_sender(Arc::new(RpcSender::new(rpc, config.trading.preflight_check)))
            .with_sender(Arc::new(relay))
            .with_sender(Arc::new(hosted)))
    }

    /// Relay-flagged intents always go to the priority relay
    pub fn select_kind(&self, intent: &SwapIntent) -> SenderKind {
        if intent.use_priority_relay {
            SenderKind::PriorityRelay
        } else {
            self.default
        }
    }

    pub fn select(&self, intent: &SwapIntent) -> Result<Arc<dyn TransactionSender>, SendError> {
        let kind = self.select_kind(intent);
        self.senders
            .get(&kind)
            .cloned()
            .ok_or(SendError::NotConfigured(kind))
    }
}

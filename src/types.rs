//! Common types used throughout the pipeline

use chrono::Utc;
use serde::{Deserialize, Serialize};
use solana_sdk::{hash::Hash, pubkey::Pubkey};
use std::fmt;
use uuid::Uuid;

use crate::tx_builder::BuilderKind;

/// Decimals of the native asset (SOL / WSOL)
pub const NATIVE_DECIMALS: u8 = 9;

/// Wrapped SOL mint
pub fn native_mint() -> Pubkey {
    spl_token::native_mint::id()
}

/// Current unix time in seconds
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Swap direction as seen from the native asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapDirection {
    Buy,
    Sell,
    /// Any direction string this build does not understand. Rejected by the builder.
    #[serde(other)]
    Unsupported,
}

impl fmt::Display for SwapDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapDirection::Buy => write!(f, "buy"),
            SwapDirection::Sell => write!(f, "sell"),
            SwapDirection::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// How `amount` is interpreted on a sell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapInType {
    /// Percent of the wallet's current token balance
    #[serde(rename = "pct")]
    Percentage,
    /// Absolute token quantity in ui units
    #[serde(rename = "qty")]
    Quantity,
    #[serde(other)]
    Unsupported,
}

impl fmt::Display for SwapInType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapInType::Percentage => write!(f, "pct"),
            SwapInType::Quantity => write!(f, "qty"),
            SwapInType::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// A request to swap, produced upstream and consumed exactly once by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapIntent {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub direction: SwapDirection,
    pub input_mint: String,
    pub output_mint: String,
    pub user_pubkey: String,
    /// Raw ui quantity (SOL for buys, tokens or percent for sells)
    pub amount: f64,
    #[serde(default)]
    pub in_type: Option<SwapInType>,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u16,
    #[serde(default, alias = "use_jito")]
    pub use_priority_relay: bool,
    /// Priority fee in SOL
    #[serde(default)]
    pub priority_fee: Option<f64>,
    /// Producer tag, e.g. "copytrade"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Per-intent strategy override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builder: Option<BuilderKind>,
}

fn default_slippage_bps() -> u16 {
    100
}

impl SwapIntent {
    pub fn buy(output_mint: impl Into<String>, user_pubkey: impl Into<String>, amount_sol: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            direction: SwapDirection::Buy,
            input_mint: native_mint().to_string(),
            output_mint: output_mint.into(),
            user_pubkey: user_pubkey.into(),
            amount: amount_sol,
            in_type: None,
            slippage_bps: default_slippage_bps(),
            use_priority_relay: false,
            priority_fee: None,
            origin: None,
            builder: None,
        }
    }

    pub fn sell(
        input_mint: impl Into<String>,
        user_pubkey: impl Into<String>,
        amount: f64,
        in_type: SwapInType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            direction: SwapDirection::Sell,
            input_mint: input_mint.into(),
            output_mint: native_mint().to_string(),
            user_pubkey: user_pubkey.into(),
            amount,
            in_type: Some(in_type),
            slippage_bps: default_slippage_bps(),
            use_priority_relay: false,
            priority_fee: None,
            origin: None,
            builder: None,
        }
    }

    pub fn with_slippage_bps(mut self, slippage_bps: u16) -> Self {
        self.slippage_bps = slippage_bps;
        self
    }

    pub fn with_priority_relay(mut self, priority_fee: Option<f64>) -> Self {
        self.use_priority_relay = true;
        self.priority_fee = priority_fee;
        self
    }

    pub fn with_priority_fee(mut self, priority_fee: f64) -> Self {
        self.priority_fee = Some(priority_fee);
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_builder(mut self, kind: BuilderKind) -> Self {
        self.builder = Some(kind);
        self
    }

    /// The non-native side of the swap
    pub fn token_mint(&self) -> &str {
        match self.direction {
            SwapDirection::Sell => &self.input_mint,
            _ => &self.output_mint,
        }
    }
}

/// Latest blockhash plus the height after which transactions using it expire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockhashSnapshot {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
    /// Unix millis
    pub fetched_at: i64,
}

impl BlockhashSnapshot {
    pub fn new(blockhash: Hash, last_valid_block_height: u64) -> Self {
        Self {
            blockhash,
            last_valid_block_height,
            fetched_at: Utc::now().timestamp_millis(),
        }
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.fetched_at)
    }
}

/// Decimal precision of a mint and the token program that owns it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub mint: Pubkey,
    pub decimals: u8,
    pub token_program: Pubkey,
}

/// What came back from handing a signed transaction to a sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub signature: Option<String>,
    pub submitted_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Confirmed,
    Failed,
    /// Not observed at the required commitment within the confirmation budget
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub signature: String,
    pub status: SettlementStatus,
    #[serde(default)]
    pub slot: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub confirmed_at: Option<i64>,
    #[serde(default)]
    pub fee_lamports: Option<u64>,
    #[serde(default)]
    pub sol_change_lamports: Option<i64>,
    /// Raw token units gained (positive) or spent (negative) by the owner
    #[serde(default)]
    pub token_change: Option<i128>,
}

impl SettlementRecord {
    pub fn confirmed(signature: impl Into<String>, slot: u64) -> Self {
        Self {
            signature: signature.into(),
            status: SettlementStatus::Confirmed,
            slot: Some(slot),
            error: None,
            confirmed_at: Some(unix_now()),
            fee_lamports: None,
            sol_change_lamports: None,
            token_change: None,
        }
    }

    pub fn failed(signature: impl Into<String>, slot: Option<u64>, reason: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            status: SettlementStatus::Failed,
            slot,
            error: Some(reason.into()),
            confirmed_at: Some(unix_now()),
            fee_lamports: None,
            sol_change_lamports: None,
            token_change: None,
        }
    }

    pub fn unknown(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            status: SettlementStatus::Unknown,
            slot: None,
            error: None,
            confirmed_at: None,
            fee_lamports: None,
            sol_change_lamports: None,
            token_change: None,
        }
    }
}

/// Engine state of a single pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    Building,
    Sending,
    Confirming,
    Settled,
    /// The run panicked; the stage it was in is not known
    Unknown,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStage::Received => "received",
            PipelineStage::Building => "building",
            PipelineStage::Sending => "sending",
            PipelineStage::Confirming => "confirming",
            PipelineStage::Settled => "settled",
            PipelineStage::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineFailure {
    pub stage: PipelineStage,
    pub reason: String,
}

/// Terminal record published once per intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapResult {
    pub intent: SwapIntent,
    pub settlement: Option<SettlementRecord>,
    pub user_pubkey: String,
    /// `None` means nothing reached the network
    pub transaction_hash: Option<String>,
    pub submitted_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<PipelineFailure>,
}

impl SwapResult {
    /// Result of a run that never got a transaction onto the network
    pub fn failed(intent: SwapIntent, stage: PipelineStage, reason: impl Into<String>) -> Self {
        let user_pubkey = intent.user_pubkey.clone();
        Self {
            intent,
            settlement: None,
            user_pubkey,
            transaction_hash: None,
            submitted_at: unix_now(),
            failure: Some(PipelineFailure {
                stage,
                reason: reason.into(),
            }),
        }
    }

    /// Result of a run whose transaction was submitted
    pub fn settled(intent: SwapIntent, receipt: SubmissionReceipt, settlement: SettlementRecord) -> Self {
        let user_pubkey = intent.user_pubkey.clone();
        let failure = match settlement.status {
            SettlementStatus::Failed => Some(PipelineFailure {
                stage: PipelineStage::Confirming,
                reason: settlement
                    .error
                    .clone()
                    .unwrap_or_else(|| "transaction failed on-chain".to_string()),
            }),
            _ => None,
        };
        Self {
            intent,
            settlement: Some(settlement),
            user_pubkey,
            transaction_hash: receipt.signature,
            submitted_at: receipt.submitted_at,
            failure,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.settlement.as_ref().map(|s| s.status),
            Some(SettlementStatus::Confirmed)
        )
    }
}

//! Intent validation and amount routing shared by every strategy
//!
//! Buys always spend the native asset and sells always receive it. Amounts are
//! converted to base units here so that every strategy quotes the same number.

use solana_sdk::{native_token::LAMPORTS_PER_SOL, pubkey::Pubkey, signature::Keypair};
use spl_associated_token_account::get_associated_token_address_with_program_id;
use std::str::FromStr;
use std::sync::Arc;

use super::{BuildContext, BuildError, BuilderKind};
use crate::types::{native_mint, SwapDirection, SwapInType, SwapIntent, TokenMetadata, NATIVE_DECIMALS};

/// Resolved mints and base-unit amount of a swap
#[derive(Debug, Clone, PartialEq)]
pub struct SwapRoute {
    pub direction: SwapDirection,
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    /// Input amount in base units
    pub amount: u64,
    /// Metadata of the non-native side, resolved for sells
    pub token: Option<TokenMetadata>,
}

impl SwapRoute {
    /// The non-native mint
    pub fn token_mint(&self) -> Pubkey {
        match self.direction {
            SwapDirection::Sell => self.input_mint,
            _ => self.output_mint,
        }
    }
}

/// Everything a strategy needs beyond the intent itself
#[derive(Clone)]
pub struct PreparedSwap {
    pub route: SwapRoute,
    pub owner: Pubkey,
    pub signer: Arc<Keypair>,
    /// Priority fee converted to lamports
    pub priority_fee_lamports: Option<u64>,
}

/// Shape checks that need no I/O. Order matters: callers rely on a missing
/// relay fee being reported before anything strategy-specific happens.
pub fn validate_intent(intent: &SwapIntent) -> Result<(), BuildError> {
    match intent.direction {
        SwapDirection::Buy => {}
        SwapDirection::Sell => {
            if intent.in_type.is_none() {
                return Err(BuildError::MissingInType);
            }
        }
        SwapDirection::Unsupported => return Err(BuildError::InvalidDirection),
    }

    if intent.use_priority_relay && intent.priority_fee.is_none() {
        return Err(BuildError::MissingPriorityFee);
    }
    if let Some(fee) = intent.priority_fee {
        if !fee.is_finite() || fee < 0.0 {
            return Err(BuildError::InvalidAmount(format!("priority fee {fee}")));
        }
    }
    Ok(())
}

/// Validate, resolve the signer and compute the route for `strategy`
pub async fn prepare(
    ctx: &BuildContext,
    intent: &SwapIntent,
    strategy: BuilderKind,
    supported_in_types: &[SwapInType],
) -> Result<PreparedSwap, BuildError> {
    validate_intent(intent)?;

    if intent.direction == SwapDirection::Sell {
        let in_type = intent.in_type.ok_or(BuildError::MissingInType)?;
        if !supported_in_types.contains(&in_type) {
            return Err(BuildError::UnsupportedInType { strategy, in_type });
        }
    }

    let owner = parse_pubkey("user_pubkey", &intent.user_pubkey)?;
    let signer = ctx
        .wallet
        .signer_for(&owner)
        .ok_or_else(|| BuildError::UnknownSigner(intent.user_pubkey.clone()))?;

    let route = match intent.direction {
        SwapDirection::Buy => SwapRoute {
            direction: SwapDirection::Buy,
            input_mint: native_mint(),
            output_mint: parse_pubkey("output_mint", &intent.output_mint)?,
            amount: to_base_units(intent.amount, NATIVE_DECIMALS)?,
            token: None,
        },
        SwapDirection::Sell => {
            let input_mint = parse_pubkey("input_mint", &intent.input_mint)?;
            let token = ctx
                .tokens
                .get(&input_mint)
                .await?
                .ok_or_else(|| BuildError::TokenMetadataMissing {
                    mint: intent.input_mint.clone(),
                })?;
            let amount = match intent.in_type {
                Some(SwapInType::Percentage) => percent_of_balance(ctx, &owner, &token, intent.amount).await?,
                _ => to_base_units(intent.amount, token.decimals)?,
            };
            SwapRoute {
                direction: SwapDirection::Sell,
                input_mint,
                output_mint: native_mint(),
                amount,
                token: Some(token),
            }
        }
        SwapDirection::Unsupported => return Err(BuildError::InvalidDirection),
    };

    Ok(PreparedSwap {
        route,
        owner,
        signer,
        priority_fee_lamports: intent.priority_fee.map(sol_to_lamports),
    })
}

/// `ui_amount × 10^decimals`, rounded to the nearest base unit
pub fn to_base_units(ui_amount: f64, decimals: u8) -> Result<u64, BuildError> {
    if !ui_amount.is_finite() || ui_amount <= 0.0 {
        return Err(BuildError::InvalidAmount(format!("{ui_amount}")));
    }
    let scaled = (ui_amount * 10f64.powi(decimals as i32)).round();
    if scaled < 1.0 {
        return Err(BuildError::InvalidAmount(format!(
            "{ui_amount} is below one base unit at {decimals} decimals"
        )));
    }
    if scaled >= u64::MAX as f64 {
        return Err(BuildError::InvalidAmount(format!("{ui_amount} overflows u64")));
    }
    Ok(scaled as u64)
}

pub fn sol_to_lamports(sol: f64) -> u64 {
    (sol * LAMPORTS_PER_SOL as f64).round().max(0.0) as u64
}

/// `pct` percent of the owner's token balance, floored
async fn percent_of_balance(
    ctx: &BuildContext,
    owner: &Pubkey,
    token: &TokenMetadata,
    pct: f64,
) -> Result<u64, BuildError> {
    if !pct.is_finite() || pct <= 0.0 || pct > 100.0 {
        return Err(BuildError::InvalidAmount(format!("sell percentage {pct}")));
    }
    let ata = get_associated_token_address_with_program_id(owner, &token.mint, &token.token_program);
    let balance = ctx
        .rpc
        .get_token_account_balance(&ata)
        .await?
        .filter(|b| *b > 0)
        .ok_or_else(|| BuildError::NoTokenBalance(token.mint.to_string()))?;

    let pct_bps = (pct * 100.0).round() as u128;
    let amount = (balance as u128 * pct_bps / 10_000) as u64;
    if amount == 0 {
        return Err(BuildError::InvalidAmount(format!(
            "{pct}% of {balance} rounds to zero"
        )));
    }
    Ok(amount)
}

pub(crate) fn parse_pubkey(field: &'static str, value: &str) -> Result<Pubkey, BuildError> {
    Pubkey::from_str(value).map_err(|_| BuildError::InvalidMint {
        field,
        value: value.to_string(),
    })
}

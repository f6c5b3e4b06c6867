//! Aggregator-routed swaps
//!
//! Two calls against the aggregator: `GET /quote` picks the route, `POST /swap`
//! returns an unsigned transaction for it. The transaction is signed locally and
//! never leaves the process unsigned.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, warn};

use super::routing::{self, PreparedSwap};
use super::{signing, BuildContext, BuildError, BuilderKind, BuiltTransaction, TransactionBuilder};
use crate::config::AmmRoutedConfig;
use crate::types::{SwapInType, SwapIntent};

const SERVICE: &str = "amm_routed";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    swap_transaction: String,
    #[serde(default)]
    last_valid_block_height: Option<u64>,
}

pub struct AmmRoutedBuilder {
    http: Client,
    base_url: String,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl AmmRoutedBuilder {
    pub fn new(base_url: impl Into<String>, timeout: Duration, rate_limit_rps: u32) -> Result<Self, BuildError> {
        let http = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(16)
            .build()
            .map_err(|e| BuildError::quote(SERVICE, e.to_string()))?;
        let limiter = NonZeroU32::new(rate_limit_rps).map(|rps| RateLimiter::direct(Quota::per_second(rps)));
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limiter,
        })
    }

    pub fn from_config(config: &AmmRoutedConfig) -> Result<Self, BuildError> {
        Self::new(
            config.base_url.clone(),
            Duration::from_millis(config.timeout_ms),
            config.rate_limit_rps,
        )
    }

    async fn throttle(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    async fn quote(&self, prepared: &PreparedSwap, slippage_bps: u16) -> Result<Value, BuildError> {
        self.throttle().await;
        let route = &prepared.route;
        let resp = self
            .http
            .get(format!("{}/quote", self.base_url))
            .query(&[
                ("inputMint", route.input_mint.to_string()),
                ("outputMint", route.output_mint.to_string()),
                ("amount", route.amount.to_string()),
                ("slippageBps", slippage_bps.to_string()),
            ])
            .send()
            .await
            .map_err(|e| BuildError::quote(SERVICE, format!("quote request: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, body = %body, "Quote request rejected");
            return Err(BuildError::quote(SERVICE, format!("quote returned {status}")));
        }

        let quote: Value = resp
            .json()
            .await
            .map_err(|e| BuildError::quote(SERVICE, format!("quote JSON parse error: {e}")))?;
        if let Some(err) = quote.get("error").and_then(Value::as_str) {
            return Err(BuildError::quote(SERVICE, err.to_string()));
        }
        Ok(quote)
    }

    async fn swap(&self, prepared: &PreparedSwap, quote: Value, use_relay: bool) -> Result<SwapResponse, BuildError> {
        self.throttle().await;
        let body = json!({
            "quoteResponse": quote,
            "userPublicKey": prepared.owner.to_string(),
            "wrapAndUnwrapSol": true,
            "prioritizationFeeLamports": prioritization_fee(prepared.priority_fee_lamports, use_relay),
        });

        let resp = self
            .http
            .post(format!("{}/swap", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| BuildError::quote(SERVICE, format!("swap request: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(BuildError::quote(SERVICE, format!("swap returned {status}")));
        }
        resp.json()
            .await
            .map_err(|e| BuildError::quote(SERVICE, format!("swap JSON parse error: {e}")))
    }
}

/// Relay tips ride in the swap request so the service places the tip instruction
fn prioritization_fee(fee_lamports: Option<u64>, use_relay: bool) -> Value {
    match (fee_lamports, use_relay) {
        (Some(fee), true) => json!({ "jitoTipLamports": fee }),
        (Some(fee), false) => json!(fee),
        (None, _) => json!("auto"),
    }
}

#[async_trait]
impl TransactionBuilder for AmmRoutedBuilder {
    fn kind(&self) -> BuilderKind {
        BuilderKind::AmmRouted
    }

    async fn build(&self, ctx: &BuildContext, intent: &SwapIntent) -> Result<BuiltTransaction, BuildError> {
        let prepared = routing::prepare(
            ctx,
            intent,
            self.kind(),
            &[SwapInType::Percentage, SwapInType::Quantity],
        )
        .await?;

        let quote = self.quote(&prepared, intent.slippage_bps).await?;
        let out_amount = quote.get("outAmount").and_then(Value::as_str).unwrap_or("?");
        debug!(intent_id = %intent.id, out_amount, "Quote received");
        let swap = self.swap(&prepared, quote, intent.use_priority_relay).await?;
        let transaction = signing::sign_serialized(&swap.swap_transaction, &prepared.signer)?;

        Ok(BuiltTransaction::new(
            transaction,
            swap.last_valid_block_height,
            prepared.route,
            self.kind(),
        ))
    }
}

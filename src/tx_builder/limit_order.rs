//! Limit orders through the order API
//!
//! The order asks `target_ratio` output units per input unit. The API returns
//! an unsigned order-creation transaction which is signed locally. The API has
//! no tip field, so relayed orders get the tip transfer appended before signing.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;
use std::time::Duration;

use super::routing::{self, PreparedSwap};
use super::{signing, BuildContext, BuildError, BuilderKind, BuiltTransaction, TransactionBuilder};
use crate::config::LimitOrderConfig;
use crate::types::{SwapDirection, SwapInType, SwapIntent, NATIVE_DECIMALS};

const SERVICE: &str = "limit_order";

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    tx: String,
    #[serde(default)]
    order: Option<String>,
}

pub struct LimitOrderBuilder {
    http: Client,
    base_url: String,
    target_ratio: f64,
    compute_unit_price: Option<u64>,
    api_key: Option<String>,
    tip_accounts: Vec<Pubkey>,
}

impl LimitOrderBuilder {
    pub fn from_config(config: &LimitOrderConfig, tip_accounts: &[String]) -> Result<Self, BuildError> {
        let tip_accounts = tip_accounts
            .iter()
            .map(|a| routing::parse_pubkey("tip_account", a))
            .collect::<Result<Vec<_>, _>>()?;
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| BuildError::quote(SERVICE, e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            target_ratio: config.target_ratio,
            compute_unit_price: config.compute_unit_price,
            api_key: config.api_key.clone(),
            tip_accounts,
        })
    }

    /// Base units of output asked for the order
    fn taking_amount(&self, prepared: &PreparedSwap, output_decimals: u8) -> Result<u64, BuildError> {
        let input_decimals = match prepared.route.direction {
            SwapDirection::Sell => prepared
                .route
                .token
                .as_ref()
                .map(|t| t.decimals)
                .unwrap_or(NATIVE_DECIMALS),
            _ => NATIVE_DECIMALS,
        };
        let ui_amount = prepared.route.amount as f64 / 10f64.powi(input_decimals as i32);
        routing::to_base_units(ui_amount * self.target_ratio, output_decimals)
    }

    fn request_body(&self, prepared: &PreparedSwap, taking_amount: u64, token_program: &str) -> Value {
        let (input_program, output_program) = match prepared.route.direction {
            SwapDirection::Sell => (token_program.to_string(), spl_token::id().to_string()),
            _ => (spl_token::id().to_string(), token_program.to_string()),
        };
        let compute_unit_price = match self.compute_unit_price {
            Some(price) => json!(price),
            None => json!("auto"),
        };
        let owner = prepared.owner.to_string();
        json!({
            "inputMint": prepared.route.input_mint.to_string(),
            "outputMint": prepared.route.output_mint.to_string(),
            "maker": owner,
            "payer": owner,
            "params": {
                "makingAmount": prepared.route.amount.to_string(),
                "takingAmount": taking_amount.to_string(),
            },
            "computeUnitPrice": compute_unit_price,
            "inputTokenProgram": input_program,
            "outputTokenProgram": output_program,
        })
    }
}

#[async_trait]
impl TransactionBuilder for LimitOrderBuilder {
    fn kind(&self) -> BuilderKind {
        BuilderKind::LimitOrder
    }

    async fn build(&self, ctx: &BuildContext, intent: &SwapIntent) -> Result<BuiltTransaction, BuildError> {
        let prepared = routing::prepare(
            ctx,
            intent,
            self.kind(),
            &[SwapInType::Percentage, SwapInType::Quantity],
        )
        .await?;

        // Buys need the output token's decimals and program too
        let token = match &prepared.route.token {
            Some(token) => token.clone(),
            None => {
                let mint = prepared.route.token_mint();
                ctx.tokens
                    .get(&mint)
                    .await?
                    .ok_or_else(|| BuildError::TokenMetadataMissing {
                        mint: mint.to_string(),
                    })?
            }
        };
        let output_decimals = match prepared.route.direction {
            SwapDirection::Sell => NATIVE_DECIMALS,
            _ => token.decimals,
        };

        let tip = if intent.use_priority_relay {
            let lamports = prepared.priority_fee_lamports.ok_or(BuildError::MissingPriorityFee)?;
            let tip_account = self
                .tip_accounts
                .choose(&mut rand::thread_rng())
                .copied()
                .ok_or_else(|| BuildError::instruction_failed("system", "no tip accounts configured"))?;
            Some((tip_account, lamports))
        } else {
            None
        };

        let taking_amount = self.taking_amount(&prepared, output_decimals)?;
        let body = self.request_body(&prepared, taking_amount, &token.token_program.to_string());

        let mut req = self.http.post(format!("{}/createOrder", self.base_url)).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| BuildError::quote(SERVICE, format!("createOrder request: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BuildError::quote(SERVICE, format!("createOrder returned {status}: {body}")));
        }
        let order: CreateOrderResponse = resp
            .json()
            .await
            .map_err(|e| BuildError::quote(SERVICE, format!("createOrder JSON parse error: {e}")))?;

        tracing::debug!(intent_id = %intent.id, order = ?order.order, taking_amount, "Limit order created");
        let transaction = match tip {
            Some((tip_account, lamports)) => {
                signing::sign_serialized_with_transfer(&order.tx, &prepared.signer, &tip_account, lamports)?
            }
            None => signing::sign_serialized(&order.tx, &prepared.signer)?,
        };
        Ok(BuiltTransaction::new(transaction, None, prepared.route, self.kind()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::{build_context, unsigned_transfer};
    use mockito::Matcher;

    fn config(url: String) -> LimitOrderConfig {
        LimitOrderConfig {
            base_url: url,
            target_ratio: 2.0,
            compute_unit_price: None,
            api_key: Some("secret".into()),
            timeout_ms: 5_000,
        }
    }

    #[tokio::test]
    async fn test_sell_asks_for_target_ratio_in_sol() {
        let (ctx, rpc, user) = build_context().await;
        let mint = Pubkey::new_unique();
        rpc.add_mint(mint, 6);
        let unsigned = signing::encode_transaction(&unsigned_transfer(&user)).unwrap();

        let mut server = mockito::Server::new_async().await;
        let create = server
            .mock("POST", "/createOrder")
            .match_header("x-api-key", "secret")
            .match_body(Matcher::PartialJson(json!({
                "inputMint": mint.to_string(),
                "maker": user.to_string(),
                "params": {"makingAmount": "100000000", "takingAmount": "200000000000"},
                "computeUnitPrice": "auto",
                "outputTokenProgram": spl_token::id().to_string(),
            })))
            .with_body(json!({"tx": unsigned, "order": "Order1"}).to_string())
            .create_async()
            .await;

        let builder = LimitOrderBuilder::from_config(&config(server.url()), &[]).unwrap();
        let intent = SwapIntent::sell(mint.to_string(), user.to_string(), 100.0, SwapInType::Quantity);
        let built = builder.build(&ctx, &intent).await.unwrap();

        create.assert_async().await;
        assert_eq!(built.route.amount, 100_000_000);
        assert!(built.last_valid_block_height.is_none());
    }

    #[tokio::test]
    async fn test_relayed_order_carries_tip_transfer() {
        let (ctx, rpc, user) = build_context().await;
        let mint = Pubkey::new_unique();
        rpc.add_mint(mint, 6);
        let unsigned = signing::encode_transaction(&unsigned_transfer(&user)).unwrap();
        let tip_account = Pubkey::new_unique();

        let mut server = mockito::Server::new_async().await;
        let create = server
            .mock("POST", "/createOrder")
            .match_body(Matcher::PartialJson(json!({
                "maker": user.to_string(),
                "params": {"makingAmount": "500000000"},
            })))
            .with_body(json!({"tx": unsigned}).to_string())
            .create_async()
            .await;

        let builder =
            LimitOrderBuilder::from_config(&config(server.url()), &[tip_account.to_string()]).unwrap();
        let intent = SwapIntent::buy(mint.to_string(), user.to_string(), 0.5).with_priority_relay(Some(0.0001));
        let built = builder.build(&ctx, &intent).await.unwrap();
        create.assert_async().await;

        let message = &built.transaction.message;
        let keys = message.static_account_keys();
        let tip = message.instructions().last().unwrap();
        assert_eq!(keys[tip.program_id_index as usize], solana_sdk::system_program::id());
        assert_eq!(keys[tip.accounts[1] as usize], tip_account);
        assert_eq!(
            tip.data,
            solana_sdk::system_instruction::transfer(&user, &tip_account, 100_000).data
        );
        assert!(built.transaction.verify_with_results().iter().all(|ok| *ok));
    }

    #[tokio::test]
    async fn test_relayed_order_without_tip_accounts_fails() {
        let (ctx, rpc, user) = build_context().await;
        let mint = Pubkey::new_unique();
        rpc.add_mint(mint, 6);

        let mut server = mockito::Server::new_async().await;
        let create = server.mock("POST", "/createOrder").expect(0).create_async().await;

        let builder = LimitOrderBuilder::from_config(&config(server.url()), &[]).unwrap();
        let intent = SwapIntent::buy(mint.to_string(), user.to_string(), 0.5).with_priority_relay(Some(0.0001));
        assert!(matches!(
            builder.build(&ctx, &intent).await,
            Err(BuildError::Instruction { .. })
        ));
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_buy_requires_output_decimals() {
        let (ctx, _rpc, user) = build_context().await;
        let mut server = mockito::Server::new_async().await;
        let create = server.mock("POST", "/createOrder").expect(0).create_async().await;

        let builder = LimitOrderBuilder::from_config(&config(server.url()), &[]).unwrap();
        let intent = SwapIntent::buy(Pubkey::new_unique().to_string(), user.to_string(), 1.0);
        assert!(matches!(
            builder.build(&ctx, &intent).await,
            Err(BuildError::TokenMetadataMissing { .. })
        ));
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_buy_taking_amount_uses_token_decimals() {
        let (ctx, rpc, user) = build_context().await;
        let mint = Pubkey::new_unique();
        rpc.add_mint(mint, 6);
        let unsigned = signing::encode_transaction(&unsigned_transfer(&user)).unwrap();

        let mut server = mockito::Server::new_async().await;
        let create = server
            .mock("POST", "/createOrder")
            .match_body(Matcher::PartialJson(json!({
                "params": {"makingAmount": "500000000", "takingAmount": "1000000"},
            })))
            .with_body(json!({"tx": unsigned}).to_string())
            .create_async()
            .await;

        let builder = LimitOrderBuilder::from_config(&config(server.url()), &[]).unwrap();
        let intent = SwapIntent::buy(mint.to_string(), user.to_string(), 0.5);
        builder.build(&ctx, &intent).await.unwrap();
        create.assert_async().await;
    }
}

//! End-to-end runs of one intent through build, submit and settle against a fake node

use solana_sdk::{commitment_config::CommitmentLevel, pubkey::Pubkey};
use std::sync::Arc;
use std::time::Duration;

use super::support::{build_context, pool_keys, FakeRpc};
use crate::engine::{IntentExecutor, RetryPolicy, SwapPipeline};
use crate::rpc_manager::{RpcManagerError, SignatureState};
use crate::sender::{RpcSender, SenderKind, SenderRouter};
use crate::settlement::SettlementProcessor;
use crate::tx_builder::{BuilderKind, BuilderRouter, BuilderStrategy, DirectPoolBuilder, PoolRegistry};
use crate::types::{PipelineStage, SettlementStatus, SwapInType, SwapIntent};

struct Fixture {
    pipeline: SwapPipeline,
    rpc: Arc<FakeRpc>,
    user: Pubkey,
    mint: Pubkey,
}

async fn fixture() -> Fixture {
    let (ctx, rpc, user) = build_context().await;
    let mint = Pubkey::new_unique();
    rpc.add_mint(mint, 6);
    let keys = pool_keys(mint);
    rpc.set_token_balance(keys.base_vault, 1_000_000_000_000);
    rpc.set_token_balance(keys.quote_vault, 500_000_000_000);

    let mut pools = PoolRegistry::new();
    pools.insert(keys);
    let builders = BuilderRouter::new(ctx, BuilderKind::DirectPool).with_strategy(BuilderStrategy::DirectPool(
        DirectPoolBuilder::new(pools, 200_000, 100_000, vec![Pubkey::new_unique()]),
    ));
    let senders = SenderRouter::new(SenderKind::Default).with_sender(Arc::new(RpcSender::new(rpc.clone(), true)));
    let settlement = SettlementProcessor::new(
        rpc.clone(),
        CommitmentLevel::Finalized,
        Duration::from_secs(45),
        Duration::from_millis(500),
    );

    let pipeline = SwapPipeline::new(
        Arc::new(builders),
        Arc::new(senders),
        Arc::new(settlement),
        RetryPolicy::default(),
    );
    Fixture {
        pipeline,
        rpc,
        user,
        mint,
    }
}

#[tokio::test(start_paused = true)]
async fn test_confirmed_buy_reports_signature_and_slot() {
    let f = fixture().await;
    f.rpc.confirm_everything(55);

    let intent = SwapIntent::buy(f.mint.to_string(), f.user.to_string(), 0.5);
    let result = f.pipeline.execute(intent.clone()).await;

    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.intent, intent);
    assert_eq!(result.user_pubkey, f.user.to_string());
    let settlement = result.settlement.unwrap();
    assert_eq!(settlement.slot, Some(55));
    assert_eq!(result.transaction_hash.as_deref(), Some(settlement.signature.as_str()));
    assert_eq!(f.rpc.sends(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_mint_fails_at_building_without_sending() {
    let f = fixture().await;
    let intent = SwapIntent::buy(Pubkey::new_unique().to_string(), f.user.to_string(), 0.5);

    let result = f.pipeline.execute(intent).await;
    let failure = result.failure.unwrap();
    assert_eq!(failure.stage, PipelineStage::Building);
    assert!(failure.reason.contains("Token metadata missing"), "{}", failure.reason);
    assert!(result.transaction_hash.is_none());
    assert!(result.settlement.is_none());
    assert_eq!(f.rpc.sends(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sell_of_unknown_mint_fails_at_building_without_sending() {
    let f = fixture().await;
    let unknown = Pubkey::new_unique();
    let intent = SwapIntent::sell(unknown.to_string(), f.user.to_string(), 50.0, SwapInType::Percentage);

    let result = f.pipeline.execute(intent).await;
    let failure = result.failure.unwrap();
    assert_eq!(failure.stage, PipelineStage::Building);
    assert!(failure.reason.contains("Token metadata missing"), "{}", failure.reason);
    assert!(failure.reason.contains(&unknown.to_string()), "{}", failure.reason);
    assert!(result.transaction_hash.is_none());
    assert!(result.settlement.is_none());
    assert_eq!(f.rpc.blockhash_fetches(), 0);
    assert_eq!(f.rpc.sends(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_relay_without_fee_is_rejected_before_network() {
    let f = fixture().await;
    let intent = SwapIntent::buy(f.mint.to_string(), f.user.to_string(), 0.5).with_priority_relay(None);

    let result = f.pipeline.execute(intent).await;
    assert_eq!(result.failure.unwrap().stage, PipelineStage::Building);
    assert_eq!(f.rpc.blockhash_fetches(), 0);
    assert_eq!(f.rpc.sends(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_send_failures_are_retried() {
    let f = fixture().await;
    f.rpc.confirm_everything(60);
    f.rpc.push_send_timeout();

    let result = f
        .pipeline
        .execute(SwapIntent::buy(f.mint.to_string(), f.user.to_string(), 0.5))
        .await;
    assert!(result.is_success(), "{result:?}");
    assert_eq!(f.rpc.sends(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_fails_at_sending() {
    let f = fixture().await;
    for _ in 0..5 {
        f.rpc.push_send_timeout();
    }

    let result = f
        .pipeline
        .execute(SwapIntent::buy(f.mint.to_string(), f.user.to_string(), 0.5))
        .await;
    let failure = result.failure.unwrap();
    assert_eq!(failure.stage, PipelineStage::Sending);
    assert!(failure.reason.contains("3 attempt(s)"), "{}", failure.reason);
    assert!(result.transaction_hash.is_none());
    assert_eq!(f.rpc.sends(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_send_failure_is_not_retried() {
    let f = fixture().await;
    f.rpc.push_send_error(RpcManagerError::InsufficientFunds {
        endpoint: "fake://rpc".into(),
    });

    let result = f
        .pipeline
        .execute(SwapIntent::buy(f.mint.to_string(), f.user.to_string(), 0.5))
        .await;
    assert_eq!(result.failure.unwrap().stage, PipelineStage::Sending);
    assert_eq!(f.rpc.sends(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_settlement_timeout_keeps_signature() {
    let f = fixture().await;

    let result = f
        .pipeline
        .execute(SwapIntent::buy(f.mint.to_string(), f.user.to_string(), 0.5))
        .await;
    let settlement = result.settlement.clone().unwrap();
    assert_eq!(settlement.status, SettlementStatus::Unknown);
    assert!(result.failure.is_none());
    assert!(!result.is_success());
    assert_eq!(result.transaction_hash, Some(settlement.signature));
}

#[tokio::test(start_paused = true)]
async fn test_on_chain_failure_reports_confirming_stage() {
    let f = fixture().await;
    f.rpc.push_status(Some(SignatureState {
        slot: 61,
        err: Some("InstructionError(5, Custom(30))".into()),
        commitment_reached: true,
    }));

    let result = f
        .pipeline
        .execute(SwapIntent::buy(f.mint.to_string(), f.user.to_string(), 0.5))
        .await;
    assert_eq!(result.failure.unwrap().stage, PipelineStage::Confirming);
    assert_eq!(result.settlement.unwrap().status, SettlementStatus::Failed);
    assert!(result.transaction_hash.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_failed_simulation_blocks_submission() {
    let f = fixture().await;
    let pipeline = f.pipeline.with_simulation(true);
    f.rpc.set_simulation_error(Some("InstructionError(5, Custom(30))".into()));

    let result = pipeline
        .execute(SwapIntent::buy(f.mint.to_string(), f.user.to_string(), 0.5))
        .await;
    assert_eq!(result.failure.unwrap().stage, PipelineStage::Sending);
    assert_eq!(f.rpc.sends(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unconfigured_sender_fails_at_sending() {
    let f = fixture().await;
    let intent = SwapIntent::buy(f.mint.to_string(), f.user.to_string(), 0.5).with_priority_relay(Some(0.0001));

    let result = f.pipeline.execute(intent).await;
    let failure = result.failure.unwrap();
    assert_eq!(failure.stage, PipelineStage::Sending);
    assert!(failure.reason.contains("priority_relay"), "{}", failure.reason);
    assert_eq!(f.rpc.sends(), 0);
}

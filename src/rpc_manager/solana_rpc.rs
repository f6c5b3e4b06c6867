//! `RpcGateway` backed by the nonblocking Solana RPC client

use async_trait::async_trait;
use solana_client::{client_error::ClientErrorKind, nonblocking::rpc_client::RpcClient};
use solana_rpc_client_api::config::{
    RpcSendTransactionConfig, RpcSimulateTransactionConfig, RpcTransactionConfig,
};
use solana_sdk::{
    commitment_config::{CommitmentConfig, CommitmentLevel},
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use solana_transaction_status::UiTransactionEncoding;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{
    AccountSnapshot, RpcGateway, RpcManagerError, SignatureState, SimulationOutcome,
    TokenBalanceEntry, TransactionBalances,
};
use crate::metrics::metrics;

pub struct SolanaRpcGateway {
    client: Arc<RpcClient>,
    endpoint: String,
    timeout_ms: u64,
    commitment: CommitmentConfig,
}

impl SolanaRpcGateway {
    pub fn new(endpoint: &str, timeout: Duration, commitment: CommitmentLevel) -> Self {
        let commitment = CommitmentConfig { commitment };
        let client = RpcClient::new_with_timeout_and_commitment(endpoint.to_string(), timeout, commitment);
        Self {
            client: Arc::new(client),
            endpoint: endpoint.to_string(),
            timeout_ms: timeout.as_millis() as u64,
            commitment,
        }
    }

    fn map_err(&self, err: solana_client::client_error::ClientError) -> RpcManagerError {
        RpcManagerError::from_client_error(err, &self.endpoint, self.timeout_ms)
    }
}

#[async_trait]
impl RpcGateway for SolanaRpcGateway {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn get_latest_blockhash(&self) -> Result<(Hash, u64), RpcManagerError> {
        let start = Instant::now();
        let result = self
            .client
            .get_latest_blockhash_with_commitment(self.commitment)
            .await
            .map_err(|e| self.map_err(e));
        metrics().rpc_latency.observe(start.elapsed().as_secs_f64());
        result
    }

    async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<AccountSnapshot>, RpcManagerError> {
        let response = self
            .client
            .get_account_with_commitment(pubkey, self.commitment)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(response.value.map(|account| AccountSnapshot {
            owner: account.owner,
            lamports: account.lamports,
            data: account.data,
        }))
    }

    async fn get_token_account_balance(&self, pubkey: &Pubkey) -> Result<Option<u64>, RpcManagerError> {
        match self.client.get_token_account_balance(pubkey).await {
            Ok(amount) => amount
                .amount
                .parse::<u64>()
                .map(Some)
                .map_err(|e| RpcManagerError::InvalidResponse(format!("token amount: {e}"))),
            Err(err) if err.to_string().contains("could not find account") => Ok(None),
            Err(err) => Err(self.map_err(err)),
        }
    }

    async fn get_minimum_balance_for_rent_exemption(&self, data_len: usize) -> Result<u64, RpcManagerError> {
        self.client
            .get_minimum_balance_for_rent_exemption(data_len)
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn simulate_transaction(
        &self,
        tx: &VersionedTransaction,
    ) -> Result<SimulationOutcome, RpcManagerError> {
        let config = RpcSimulateTransactionConfig {
            sig_verify: false,
            commitment: Some(self.commitment),
            encoding: Some(UiTransactionEncoding::Base64),
            ..RpcSimulateTransactionConfig::default()
        };
        let response = self
            .client
            .simulate_transaction_with_config(tx, config)
            .await
            .map_err(|e| self.map_err(e))?;
        let value = response.value;
        Ok(SimulationOutcome {
            err: value.err.map(|e| format!("{e:?}")),
            logs: value.logs.unwrap_or_default(),
            units_consumed: value.units_consumed,
        })
    }

    async fn send_transaction(
        &self,
        tx: &VersionedTransaction,
        skip_preflight: bool,
    ) -> Result<Signature, RpcManagerError> {
        let config = RpcSendTransactionConfig {
            skip_preflight,
            preflight_commitment: Some(self.commitment.commitment),
            encoding: Some(UiTransactionEncoding::Base64),
            max_retries: Some(0),
            min_context_slot: None,
        };
        let start = Instant::now();
        let result = self
            .client
            .send_transaction_with_config(tx, config)
            .await
            .map_err(|e| self.map_err(e));
        metrics().rpc_latency.observe(start.elapsed().as_secs_f64());
        result
    }

    async fn get_signature_status(
        &self,
        signature: &Signature,
        commitment: CommitmentLevel,
    ) -> Result<Option<SignatureState>, RpcManagerError> {
        let response = self
            .client
            .get_signature_statuses(&[*signature])
            .await
            .map_err(|e| self.map_err(e))?;
        let status = response.value.into_iter().next().flatten();
        Ok(status.map(|status| SignatureState {
            slot: status.slot,
            commitment_reached: status.satisfies_commitment(CommitmentConfig { commitment }),
            err: status.err.map(|e| format!("{e:?}")),
        }))
    }

    async fn get_transaction_balances(
        &self,
        signature: &Signature,
        commitment: CommitmentLevel,
    ) -> Result<Option<TransactionBalances>, RpcManagerError> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(CommitmentConfig { commitment }),
            max_supported_transaction_version: Some(0),
        };
        let confirmed = match self.client.get_transaction_with_config(signature, config).await {
            Ok(tx) => tx,
            // a null result surfaces as a decode error
            Err(err) if matches!(err.kind(), ClientErrorKind::SerdeJson(_)) => {
                debug!(signature = %signature, "transaction not yet visible");
                return Ok(None);
            }
            Err(err) => return Err(self.map_err(err)),
        };

        let Some(meta) = confirmed.transaction.meta else {
            return Ok(None);
        };

        let convert = |rows: Option<Vec<_>>| -> Vec<TokenBalanceEntry> {
            rows.unwrap_or_default()
                .into_iter()
                .map(|row: solana_transaction_status::UiTransactionTokenBalance| TokenBalanceEntry {
                    owner: Option::<String>::from(row.owner),
                    mint: row.mint,
                    amount: row.ui_token_amount.amount.parse().unwrap_or(0),
                })
                .collect()
        };

        Ok(Some(TransactionBalances {
            slot: confirmed.slot,
            fee: meta.fee,
            pre_balances: meta.pre_balances,
            post_balances: meta.post_balances,
            pre_token_balances: convert(Option::from(meta.pre_token_balances)),
            post_token_balances: convert(Option::from(meta.post_token_balances)),
        }))
    }
}

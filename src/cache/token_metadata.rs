//! Mint decimals, cached for the life of the process

use dashmap::DashMap;
use solana_sdk::{pubkey, pubkey::Pubkey};
use spl_token::solana_program::program_pack::Pack;
use spl_token::state::Mint;
use std::sync::Arc;
use tracing::debug;

use crate::metrics::metrics;
use crate::rpc_manager::{AccountSnapshot, RpcGateway, RpcManagerError};
use crate::types::{native_mint, TokenMetadata, NATIVE_DECIMALS};

pub const TOKEN_2022_PROGRAM_ID: Pubkey = pubkey!("TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb");

pub struct TokenMetadataCache {
    rpc: Arc<dyn RpcGateway>,
    entries: DashMap<Pubkey, TokenMetadata>,
}

impl TokenMetadataCache {
    pub fn new(rpc: Arc<dyn RpcGateway>) -> Self {
        let entries = DashMap::new();
        entries.insert(
            native_mint(),
            TokenMetadata {
                mint: native_mint(),
                decimals: NATIVE_DECIMALS,
                token_program: spl_token::id(),
            },
        );
        Self { rpc, entries }
    }

    /// `Ok(None)` when the mint does not exist or is not a token mint
    pub async fn get(&self, mint: &Pubkey) -> Result<Option<TokenMetadata>, RpcManagerError> {
        if let Some(entry) = self.entries.get(mint) {
            metrics().token_cache_hits.inc();
            return Ok(Some(*entry));
        }
        metrics().token_cache_misses.inc();

        let Some(account) = self.rpc.get_account(mint).await? else {
            debug!(mint = %mint, "Mint account not found");
            return Ok(None);
        };
        let Some(metadata) = parse_mint_account(mint, &account) else {
            debug!(mint = %mint, owner = %account.owner, "Account is not a token mint");
            return Ok(None);
        };
        self.entries.insert(*mint, metadata);
        Ok(Some(metadata))
    }

    /// Seed an entry without a lookup
    pub fn insert(&self, metadata: TokenMetadata) {
        self.entries.insert(metadata.mint, metadata);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn is_token_program(program: &Pubkey) -> bool {
    *program == spl_token::id() || *program == TOKEN_2022_PROGRAM_ID
}

/// Decode decimals from an SPL Token or Token-2022 mint account
pub fn parse_mint_account(mint: &Pubkey, account: &AccountSnapshot) -> Option<TokenMetadata> {
    if !is_token_program(&account.owner) || account.data.len() < Mint::LEN {
        return None;
    }
    // Token-2022 mints carry extensions after the base layout
    let state = Mint::unpack_from_slice(&account.data[..Mint::LEN]).ok()?;
    if !state.is_initialized {
        return None;
    }
    Some(TokenMetadata {
        mint: *mint,
        decimals: state.decimals,
        token_program: account.owner,
    })
}

//! Trading - Solana swap execution core
//!
//! Swap intents arrive on a Redis stream, are built into signed transactions,
//! submitted through a configured sender, tracked to settlement, and reported
//! on an outbound result stream. Every intent produces exactly one result.
//!
//! ## Modules
//! - **stream**: inbound consumer groups and the outbound sink
//! - **engine**: readers, the admission gate, retry and the per-intent pipeline
//! - **tx_builder**: strategies that turn an intent into a signed transaction
//! - **sender**: RPC, priority relay and hosted relay submission
//! - **settlement**: signature polling to a terminal record
//! - **cache**: shared blockhash and token metadata caches
//! - **copytrade**: turns leader trade signals into follower intents

pub mod cache;
pub mod compat;
pub mod config;
pub mod copytrade;
pub mod endpoints;
pub mod engine;
pub mod metrics;
pub mod observability;
pub mod publisher;
pub mod rpc_manager;
pub mod sender;
pub mod settlement;
pub mod stream;
pub mod structured_logging;
pub mod tx_builder;
pub mod types;
pub mod wallet;

// Re-export commonly used types
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};
pub use types::{SwapIntent, SwapResult};

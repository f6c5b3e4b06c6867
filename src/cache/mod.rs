//! Process-wide caches shared by every pipeline run

pub mod blockhash;
pub mod store;
pub mod token_metadata;

pub use blockhash::BlockhashCache;
pub use store::{CacheStore, MemoryCacheStore, RedisCacheStore};
pub use token_metadata::TokenMetadataCache;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache entry could not be decoded: {0}")]
    Decode(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

//! Persistence for per-identity state.
//!
//! The [`Store`] trait abstracts over the in-process [`MemoryStore`] and the
//! Redis-backed [`RedisStore`] so the limiter can work with either.

mod memory;
mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::{
    RedisStore, RedisStoreOptions, DEFAULT_KEY_PREFIX, DEFAULT_OPERATION_TIMEOUT, DEFAULT_TTL,
};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::ratelimit::ClientState;

/// Errors raised by a state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Failed to encode or decode client state: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Key to [`ClientState`] storage.
///
/// Implementations only guarantee per-call atomicity. Read-modify-write
/// sequences are serialized by the limiter's per-identity locks.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or overwrite the state for `key`.
    async fn add(&self, key: &str, state: &ClientState) -> Result<(), StoreError>;

    /// Fetch the state for `key`, or `None` if the identity is unknown.
    async fn get(&self, key: &str) -> Result<Option<ClientState>, StoreError>;

    /// Whether any state is stored for `key`.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Snapshot every stored identity. Used by the sweep, not per request.
    ///
    /// Entries that disappear or cannot be decoded mid-scan are omitted; only a
    /// failure to enumerate the store is an error.
    async fn all(&self) -> Result<Vec<(String, ClientState)>, StoreError>;
}

//! Redis-backed state store.
//!
//! Each identity is stored as a JSON-encoded [`ClientState`] under
//! `<prefix>:<identity>` with a fixed expiry. The expiry only bounds memory: an
//! entry that expires mid-block is recreated as a fresh, unblocked identity.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use super::{Store, StoreError};
use crate::ratelimit::ClientState;

/// Prefix applied to every key when none is configured.
pub const DEFAULT_KEY_PREFIX: &str = "gatekeep";

/// Retention for each stored identity.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Upper bound for a single Redis command when none is configured.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(500);

/// Configuration for [`RedisStore`].
#[derive(Debug, Clone)]
pub struct RedisStoreOptions {
    /// Namespace for keys, so the store can share a Redis database.
    pub prefix: String,
    /// Expiry set on every write.
    pub ttl: Duration,
    /// Bound for each command round trip.
    pub operation_timeout: Duration,
}

impl Default for RedisStoreOptions {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            ttl: DEFAULT_TTL,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

fn namespaced(prefix: &str, key: &str) -> String {
    format!("{}:{}", prefix, key)
}

/// Strip `<prefix>:` from a stored key. Identities may themselves contain
/// colons (IPv6 addresses), so only the first separator is consumed.
fn identity_of<'a>(prefix: &str, redis_key: &'a str) -> Option<&'a str> {
    redis_key.strip_prefix(prefix).and_then(|rest| rest.strip_prefix(':'))
}

/// [`Store`] implementation over a Redis connection manager.
#[derive(Clone)]
pub struct RedisStore {
    connection_manager: ConnectionManager,
    options: RedisStoreOptions,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("options", &self.options)
            .finish()
    }
}

impl RedisStore {
    /// Wrap an existing connection manager.
    pub fn new(connection_manager: ConnectionManager, options: RedisStoreOptions) -> Self {
        Self {
            connection_manager,
            options,
        }
    }

    /// Open a client for `url` and establish a managed connection.
    pub async fn connect(url: &str, options: RedisStoreOptions) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection_manager = client.get_connection_manager().await?;

        info!(
            prefix = %options.prefix,
            ttl_secs = options.ttl.as_secs(),
            "Connected to Redis state store"
        );

        Ok(Self::new(connection_manager, options))
    }

    /// Store configuration.
    pub fn options(&self) -> &RedisStoreOptions {
        &self.options
    }

    fn redis_key(&self, key: &str) -> String {
        namespaced(&self.options.prefix, key)
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        let timeout = self.options.operation_timeout;
        match tokio::time::timeout(timeout, op).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(timeout)),
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn add(&self, key: &str, state: &ClientState) -> Result<(), StoreError> {
        let payload = serde_json::to_string(state)?;
        let mut conn = self.connection_manager.clone();
        let redis_key = self.redis_key(key);
        let ttl = self.options.ttl.as_secs().max(1);

        self.bounded(conn.set_ex::<_, _, ()>(redis_key, payload, ttl))
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<ClientState>, StoreError> {
        let mut conn = self.connection_manager.clone();
        let payload: Option<String> = self.bounded(conn.get(self.redis_key(key))).await?;

        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection_manager.clone();
        self.bounded(conn.exists(self.redis_key(key))).await
    }

    async fn all(&self) -> Result<Vec<(String, ClientState)>, StoreError> {
        let mut conn = self.connection_manager.clone();
        let pattern = format!("{}:*", self.options.prefix);
        let redis_keys: Vec<String> = self.bounded(conn.keys(pattern)).await?;

        let mut clients = Vec::with_capacity(redis_keys.len());
        for redis_key in &redis_keys {
            let Some(identity) = identity_of(&self.options.prefix, redis_key) else {
                continue;
            };

            // Entries may expire between KEYS and GET. An entry that cannot be
            // read is left out of this scan rather than failing it.
            match self.get(identity).await {
                Ok(Some(state)) => clients.push((identity.to_string(), state)),
                Ok(None) => debug!(key = %identity, "Entry expired during scan"),
                Err(e) => warn!(key = %identity, error = %e, "Skipping unreadable entry"),
            }
        }

        Ok(clients)
    }
}

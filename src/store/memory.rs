//! In-process state store.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Store, StoreError};
use crate::ratelimit::ClientState;

/// State held in a concurrent map for the lifetime of the process.
///
/// Entries are never evicted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    clients: DashMap<String, ClientState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked identities.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn add(&self, key: &str, state: &ClientState) -> Result<(), StoreError> {
        self.clients.insert(key.to_string(), state.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<ClientState>, StoreError> {
        Ok(self.clients.get(key).map(|entry| entry.value().clone()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.clients.contains_key(key))
    }

    async fn all(&self) -> Result<Vec<(String, ClientState)>, StoreError> {
        Ok(self
            .clients
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }
}

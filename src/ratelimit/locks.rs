//! Per-identity exclusive locks.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A table of async mutexes, one per identity.
///
/// Requests for the same identity serialize; different identities never
/// contend beyond the map's shard lock while the entry is looked up.
#[derive(Debug, Default)]
pub(crate) struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub(crate) async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let existing = self.locks.get(key).map(|entry| entry.value().clone());
        let mutex = match existing {
            Some(mutex) => mutex,
            None => self
                .locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value()
                .clone(),
        };
        // The shard guard is released above, before awaiting.
        mutex.lock_owned().await
    }

    /// Drop idle locks for identities that are no longer stored.
    ///
    /// A lock that is held or awaited has other strong references and is kept.
    pub(crate) fn retain_live(&self, live: &HashSet<String>) {
        self.locks
            .retain(|key, mutex| live.contains(key) || Arc::strong_count(mutex) > 1);
    }

    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}

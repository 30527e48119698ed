//! In-process store for local runs and tests.
//!
//! Same shape as the web caches: DashMap entries stamped with an expiry
//! `Instant`, checked lazily on read. Mutex leases live in a separate map and
//! are claimed through the entry API so two callers can never both win.

use crate::store::{CacheStore, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    /// key → list payload
    lists: Arc<DashMap<String, Expiring<Arc<Vec<String>>>>>,
    /// mutex key → owner token
    locks: Arc<DashMap<String, Expiring<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live (unexpired) list at `key`, dropping it if it has expired.
    fn live_list(&self, key: &str) -> Option<Arc<Vec<String>>> {
        let entry = self.lists.get(key)?;
        if entry.is_live() {
            return Some(entry.value.clone());
        }
        drop(entry);
        self.lists.remove_if(key, |_, e| !e.is_live());
        None
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.live_list(key).is_some())
    }

    async fn range(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<String>, StoreError> {
        let Some(list) = self.live_list(key) else {
            return Ok(Vec::new());
        };
        if start >= list.len() || start > stop {
            return Ok(Vec::new());
        }
        let end = stop.saturating_add(1).min(list.len());
        Ok(list[start..end].to_vec())
    }

    async fn replace_list(
        &self,
        key: &str,
        items: &[String],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        if items.is_empty() {
            self.lists.remove(key);
            return Ok(());
        }
        self.lists.insert(
            key.to_owned(),
            Expiring::new(Arc::new(items.to_vec()), ttl),
        );
        Ok(())
    }

    async fn try_lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        let acquired = match self.locks.entry(key.to_owned()) {
            Entry::Occupied(mut held) => {
                if held.get().is_live() {
                    false
                } else {
                    held.insert(Expiring::new(owner.to_owned(), ttl));
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Expiring::new(owner.to_owned(), ttl));
                true
            }
        };
        trace!(lock_key = key, acquired, "memory lock attempt");
        Ok(acquired)
    }

    async fn unlock(&self, key: &str, owner: &str) -> Result<bool, StoreError> {
        Ok(self
            .locks
            .remove_if(key, |_, held| held.value == owner)
            .is_some())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

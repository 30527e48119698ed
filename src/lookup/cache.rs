//! Cache-aside reads and writes plus the per-location mutex.
//!
//! Each location key holds a list with one JSON record per element. A
//! location that legitimately has no users holds a one-element list with the
//! [`KNOWN_EMPTY`] sentinel, because an empty list and a missing key look the
//! same to the store. A list shorter than the page size it was fetched with
//! ends in the [`COMPLETE`] marker, so later requests for more records know
//! there are no more to fetch.
//!
//! Every store call is bounded by the configured operation timeout.

use crate::lookup::models::UserRecord;
use crate::store::{CacheStore, StoreError};
use crate::utils::fmt_duration;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Payload marking a location that was looked up and had no matches.
pub const KNOWN_EMPTY: &str = "no users";

/// Trailing element of a list that holds every match the location has.
pub const COMPLETE: &str = "end of users";

/// Prefix for the mutex guarding a location's fetch-and-populate step.
pub const LOCK_PREFIX: &str = "mutex-";

/// Delay between lock attempts while waiting; jittered per attempt.
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);

/// What a cache read found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Nothing stored for the key.
    Missing,
    /// The location was looked up before and had no users.
    KnownEmpty,
    /// Stored records, in ranked order. Corrupt elements are already dropped.
    ///
    /// `complete` is set when the upstream had no further matches.
    Users {
        users: Vec<UserRecord>,
        complete: bool,
    },
}

impl CacheLookup {
    /// Whether this read can answer a request for `limit` records without a fetch.
    pub fn satisfies(&self, limit: usize) -> bool {
        match self {
            CacheLookup::Missing => false,
            CacheLookup::KnownEmpty => true,
            CacheLookup::Users { users, complete } => *complete || users.len() >= limit,
        }
    }

    pub fn is_hit(&self) -> bool {
        !matches!(self, CacheLookup::Missing)
    }

    /// Records to serve from this read, truncated to `limit`.
    pub fn into_users(self, limit: usize) -> Vec<UserRecord> {
        match self {
            CacheLookup::Missing | CacheLookup::KnownEmpty => Vec::new(),
            CacheLookup::Users { mut users, .. } => {
                users.truncate(limit);
                users
            }
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LockError {
    #[error("lock `{key}` still held elsewhere after {waited:?}")]
    Contended { key: String, waited: Duration },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// TTL for populated result lists.
    pub ttl: Duration,
    /// TTL for the known-empty sentinel.
    pub empty_ttl: Duration,
    /// Bound applied to every individual store call.
    pub op_timeout: Duration,
    /// Lease time of the per-location mutex.
    pub lock_ttl: Duration,
    /// How long `acquire_lock` keeps retrying before reporting contention.
    pub lock_wait: Duration,
    /// Maximum number of elements read back from a stored list.
    pub max_items: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60 * 60),
            empty_ttl: Duration::from_secs(5 * 60),
            op_timeout: Duration::from_secs(1),
            lock_ttl: Duration::from_secs(30),
            lock_wait: Duration::from_secs(5),
            max_items: 100,
        }
    }
}

/// Cache-aside access to ranked results and the distributed lock around them.
#[derive(Clone)]
pub struct CacheCoordinator {
    store: Arc<dyn CacheStore>,
    settings: CacheSettings,
}

impl CacheCoordinator {
    pub fn new(store: Arc<dyn CacheStore>, settings: CacheSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        let timeout = self.settings.op_timeout;
        tokio::time::timeout(timeout, fut)
            .await
            .unwrap_or(Err(StoreError::Timeout { op, timeout }))
    }

    /// Read the ranked list stored for `key`.
    ///
    /// Elements that fail to deserialize are skipped with a warning; the rest
    /// of the list is still returned.
    pub async fn read(&self, key: &str) -> Result<CacheLookup, StoreError> {
        if !self.bounded("exists", self.store.exists(key)).await? {
            trace!(key, "Cache key absent");
            return Ok(CacheLookup::Missing);
        }

        let stop = self.settings.max_items.saturating_sub(1);
        let raw = self
            .bounded("range", self.store.range(key, 0, stop))
            .await?;

        // Expired between the two calls.
        if raw.is_empty() {
            return Ok(CacheLookup::Missing);
        }
        if raw.len() == 1 && raw[0] == KNOWN_EMPTY {
            return Ok(CacheLookup::KnownEmpty);
        }

        let (raw, complete) = match raw.split_last() {
            Some((last, rest)) if last == COMPLETE => (rest, true),
            _ => (raw.as_slice(), false),
        };
        let users = decode_records(key, raw);
        Ok(CacheLookup::Users { users, complete })
    }

    /// Store `results` for `key`, or the known-empty sentinel if there are none.
    ///
    /// `page_size` is how many records were asked of the upstream; fewer
    /// results than that mark the list complete.
    pub async fn write(
        &self,
        key: &str,
        results: &[UserRecord],
        page_size: usize,
    ) -> Result<(), StoreError> {
        let (items, ttl) = if results.is_empty() {
            (vec![KNOWN_EMPTY.to_owned()], self.settings.empty_ttl)
        } else {
            let mut items = Vec::with_capacity(results.len());
            for record in results {
                let encoded = serde_json::to_string(record).map_err(|e| {
                    StoreError::Backend(format!("failed to encode {}: {e}", record.login))
                })?;
                items.push(encoded);
            }
            if results.len() < page_size {
                items.push(COMPLETE.to_owned());
            }
            (items, self.settings.ttl)
        };

        self.bounded("replace_list", self.store.replace_list(key, &items, ttl))
            .await?;
        debug!(
            key,
            records = results.len(),
            ttl = fmt_duration(ttl),
            "Cache entry written"
        );
        Ok(())
    }

    /// Take the mutex for `key`, retrying until the configured wait elapses.
    ///
    /// Contention is not a failure for the caller: it signals that another
    /// request is populating the entry and a second cache read should follow.
    pub async fn acquire_lock(&self, key: &str) -> Result<LockHandle, LockError> {
        let lock_key = format!("{LOCK_PREFIX}{key}");
        let owner = ulid::Ulid::new().to_string();
        let start = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let acquired = self
                .bounded(
                    "try_lock",
                    self.store
                        .try_lock(&lock_key, &owner, self.settings.lock_ttl),
                )
                .await?;

            if acquired {
                debug!(lock_key = %lock_key, attempts, waited = fmt_duration(start.elapsed()), "Lock acquired");
                return Ok(LockHandle {
                    store: self.store.clone(),
                    key: lock_key,
                    owner,
                    op_timeout: self.settings.op_timeout,
                    released: false,
                });
            }

            let waited = start.elapsed();
            if waited >= self.settings.lock_wait {
                debug!(lock_key = %lock_key, attempts, waited = fmt_duration(waited), "Lock contended");
                return Err(LockError::Contended {
                    key: lock_key,
                    waited,
                });
            }

            let jitter = Duration::from_millis(rand::rng().random_range(0..50));
            let remaining = self.settings.lock_wait - waited;
            tokio::time::sleep((LOCK_RETRY_DELAY + jitter).min(remaining)).await;
        }
    }
}

/// Decode each stored element on its own so one bad element cannot sink the read.
fn decode_records(key: &str, raw: &[String]) -> Vec<UserRecord> {
    raw.iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_str::<UserRecord>(item) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(key, index, error = %e, "Skipping corrupt cached record");
                None
            }
        })
        .collect()
}

/// A granted lease on a location's mutex.
///
/// Release with [`release`](Self::release). If the handle is dropped without
/// it (an early return, a cancelled request), release is spawned onto the
/// runtime instead. The unlock itself always runs as its own task, so dropping
/// a caller mid-release cannot abandon it.
pub struct LockHandle {
    store: Arc<dyn CacheStore>,
    key: String,
    owner: String,
    op_timeout: Duration,
    released: bool,
}

impl LockHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn release(mut self) {
        let unlock = tokio::spawn(release_lease(
            self.store.clone(),
            std::mem::take(&mut self.key),
            std::mem::take(&mut self.owner),
            self.op_timeout,
        ));
        self.released = true;
        if let Err(e) = unlock.await {
            warn!(error = %e, "Lock release task failed");
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        let owner = std::mem::take(&mut self.owner);
        let op_timeout = self.op_timeout;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(release_lease(store, key, owner, op_timeout));
            }
            Err(_) => {
                warn!(lock_key = %key, "No runtime to release lock; lease will expire");
            }
        }
    }
}

async fn release_lease(store: Arc<dyn CacheStore>, key: String, owner: String, op_timeout: Duration) {
    match tokio::time::timeout(op_timeout, store.unlock(&key, &owner)).await {
        Ok(Ok(true)) => debug!(lock_key = %key, "Lock released"),
        Ok(Ok(false)) => warn!(lock_key = %key, "Lock already expired or taken over before release"),
        Ok(Err(e)) => warn!(lock_key = %key, error = %e, "Failed to release lock; lease will expire"),
        Err(_) => warn!(lock_key = %key, timeout = fmt_duration(op_timeout), "Lock release timed out; lease will expire"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn coordinator(store: Arc<MemoryStore>) -> CacheCoordinator {
        CacheCoordinator::new(
            store,
            CacheSettings {
                lock_wait: Duration::from_millis(250),
                ..CacheSettings::default()
            },
        )
    }

    fn sample() -> Vec<UserRecord> {
        vec![
            UserRecord::new("torvalds", 50),
            UserRecord::new("gregkh", 20),
            UserRecord::new("axboe", 10),
        ]
    }

    #[tokio::test]
    async fn test_read_missing() {
        let cache = coordinator(Arc::new(MemoryStore::new()));
        assert_eq!(cache.read("BERLIN").await.unwrap(), CacheLookup::Missing);
    }

    #[tokio::test]
    async fn test_round_trip_preserves_order_and_counts() {
        let cache = coordinator(Arc::new(MemoryStore::new()));
        cache.write("BERLIN", &sample(), 3).await.unwrap();
        assert_eq!(
            cache.read("BERLIN").await.unwrap(),
            CacheLookup::Users {
                users: sample(),
                complete: false
            }
        );
    }

    #[tokio::test]
    async fn test_short_list_is_marked_complete() {
        let store = Arc::new(MemoryStore::new());
        let cache = coordinator(store.clone());
        cache.write("OSLO", &sample(), 10).await.unwrap();

        let raw = store.range("OSLO", 0, 99).await.unwrap();
        assert_eq!(raw.len(), 4);
        assert_eq!(raw[3], COMPLETE);

        let lookup = cache.read("OSLO").await.unwrap();
        assert!(lookup.satisfies(50));
        assert_eq!(lookup.into_users(50), sample());
    }

    #[tokio::test]
    async fn test_empty_results_store_sentinel() {
        let store = Arc::new(MemoryStore::new());
        let cache = coordinator(store.clone());
        cache.write("ATLANTIS", &[], 10).await.unwrap();

        assert_eq!(
            store.range("ATLANTIS", 0, 9).await.unwrap(),
            vec![KNOWN_EMPTY.to_owned()]
        );
        let lookup = cache.read("ATLANTIS").await.unwrap();
        assert_eq!(lookup, CacheLookup::KnownEmpty);
        assert!(lookup.satisfies(10));
        assert!(lookup.into_users(10).is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_element_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let good = serde_json::to_string(&UserRecord::new("good", 3)).unwrap();
        let items = vec![good.clone(), "{not json".to_owned(), good];
        store
            .replace_list("PARIS", &items, Duration::from_secs(60))
            .await
            .unwrap();

        let cache = coordinator(store);
        match cache.read("PARIS").await.unwrap() {
            CacheLookup::Users { users, complete } => {
                assert!(!complete);
                assert_eq!(users.len(), 2);
                assert!(users.iter().all(|u| u.login == "good"));
            }
            other => panic!("expected users, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_is_bounded_by_max_items() {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheCoordinator::new(
            store,
            CacheSettings {
                max_items: 2,
                ..CacheSettings::default()
            },
        );
        cache.write("MADRID", &sample(), 2).await.unwrap();
        match cache.read("MADRID").await.unwrap() {
            CacheLookup::Users { users, .. } => assert_eq!(users.len(), 2),
            other => panic!("expected users, got {other:?}"),
        }
    }

    #[test]
    fn test_satisfies_requires_enough_users() {
        let lookup = CacheLookup::Users {
            users: sample(),
            complete: false,
        };
        assert!(lookup.satisfies(3));
        assert!(!lookup.satisfies(4));
        assert!(!CacheLookup::Missing.satisfies(1));
        assert_eq!(lookup.into_users(2).len(), 2);
    }

    #[tokio::test]
    async fn test_lock_contention_reports_after_wait() {
        let store = Arc::new(MemoryStore::new());
        let cache = coordinator(store);
        let held = cache.acquire_lock("CAIRO").await.unwrap();
        assert_eq!(held.key(), "mutex-CAIRO");

        let start = Instant::now();
        let err = cache.acquire_lock("CAIRO").await.err().unwrap();
        assert!(matches!(err, LockError::Contended { .. }));
        assert!(start.elapsed() >= Duration::from_millis(250));

        held.release().await;
        let again = cache.acquire_lock("CAIRO").await.unwrap();
        again.release().await;
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheCoordinator::new(
            store,
            CacheSettings {
                lock_wait: Duration::from_secs(2),
                ..CacheSettings::default()
            },
        );
        let held = cache.acquire_lock("QUITO").await.unwrap();

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.acquire_lock("QUITO").await.map(|h| h.key().to_owned()) })
        };
        tokio::time::sleep(Duration::from_millis(150)).await;
        held.release().await;

        assert_eq!(waiter.await.unwrap().unwrap(), "mutex-QUITO");
    }

    #[tokio::test]
    async fn test_dropped_handle_releases_lock() {
        let store = Arc::new(MemoryStore::new());
        let cache = coordinator(store.clone());
        {
            let _held = cache.acquire_lock("LAGOS").await.unwrap();
        }
        // The drop spawned a release; let it run.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(
            store
                .try_lock("mutex-LAGOS", "other-owner", Duration::from_secs(1))
                .await
                .unwrap()
        );
    }
}

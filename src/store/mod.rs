//! Key-value backends for the result cache and the per-location mutex.
//!
//! [`CacheStore`] is the narrow contract the cache coordinator relies on:
//! existence checks, ranged list reads, atomic list replacement with a TTL,
//! and a lease-based mutex whose release is guarded by an owner token.

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("cache store operation `{op}` timed out after {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },
    #[error("cache store unavailable: {0}")]
    Backend(String),
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Whether `key` currently holds a live (unexpired) value.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Elements `start..=stop` of the list at `key` (inclusive, like `LRANGE`).
    /// A missing key reads as an empty list.
    async fn range(&self, key: &str, start: usize, stop: usize)
    -> Result<Vec<String>, StoreError>;

    /// Replace the list at `key` with `items` and set its expiry.
    ///
    /// Must be atomic: a concurrent reader sees either the previous list or
    /// the complete new one.
    async fn replace_list(
        &self,
        key: &str,
        items: &[String],
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Take the mutex `key` for `owner` unless someone else holds it.
    /// The lease lapses on its own after `ttl`.
    async fn try_lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Release the mutex `key` if `owner` still holds it. Returns whether a
    /// lease was actually removed.
    async fn unlock(&self, key: &str, owner: &str) -> Result<bool, StoreError>;

    /// Round-trip check used by the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Backend name for logs and health output.
    fn name(&self) -> &'static str;
}

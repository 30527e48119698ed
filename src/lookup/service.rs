//! Per-request orchestration of the lookup pipeline.
//!
//! ```text
//! CheckCache ─ hit ──────────────────────────────────────────────▶ Return
//!     └ miss ─ CheckRateLimit ─ active ──────────────────────────▶ RejectWithRetryAfter
//!                   └ clear ─ AcquireLock ─ RecheckCache ─ hit ──▶ Return
//!                                                └ miss ─ FetchUpstream ─ Rank ─ WriteCache ─▶ Return
//! ```
//!
//! Only the request holding the location's lock fetches upstream. A request
//! that could not get the lock serves whatever the second read found. When
//! the store itself is failing, requests fetch without the lock and skip the
//! write-back rather than wait on a broken cache.

use crate::lookup::cache::{CacheCoordinator, LockError, LockHandle};
use crate::lookup::dispatcher::{DetailFetchDispatcher, DispatchError};
use crate::lookup::models::{Query, UserRecord, rank};
use crate::lookup::rate_limit::{RateLimitTracker, SearchBudget};
use crate::lookup::upstream::{UpstreamError, UserSearch};
use crate::utils::fmt_duration;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

/// Failures surfaced to callers of the lookup pipeline.
///
/// Cache problems never appear here; they degrade into a fetch instead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LookupError {
    #[error("upstream rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("search budget exhausted, retry after {retry_after:?}")]
    BudgetExhausted { retry_after: Duration },
    #[error("upstream fetch failed")]
    Upstream(#[source] UpstreamError),
    #[error("lookup cancelled")]
    Cancelled,
}

impl LookupError {
    /// Suggested wait before retrying, for errors that carry one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LookupError::RateLimited { retry_after }
            | LookupError::BudgetExhausted { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Where a served result came from; logged and used by tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    CacheAfterWait,
    Upstream,
}

pub struct LookupService {
    search: Arc<dyn UserSearch>,
    dispatcher: DetailFetchDispatcher,
    cache: CacheCoordinator,
    tracker: Arc<RateLimitTracker>,
    budget: SearchBudget,
    max_items: usize,
}

impl LookupService {
    pub fn new(
        search: Arc<dyn UserSearch>,
        dispatcher: DetailFetchDispatcher,
        cache: CacheCoordinator,
        tracker: Arc<RateLimitTracker>,
        budget: SearchBudget,
        max_items: usize,
    ) -> Self {
        Self {
            search,
            dispatcher,
            cache,
            tracker,
            budget,
            max_items: max_items.max(1),
        }
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    pub fn cache(&self) -> &CacheCoordinator {
        &self.cache
    }

    pub fn tracker(&self) -> &RateLimitTracker {
        &self.tracker
    }

    /// Top users for `query`, ranked by public repository count.
    ///
    /// Returns at most `query.limit` records. Cancelling `cancel` aborts the
    /// pipeline at its next suspension point; a held lock is still released.
    pub async fn top_users(
        &self,
        query: &Query,
        cancel: &CancellationToken,
    ) -> Result<Vec<UserRecord>, LookupError> {
        self.top_users_with_source(query, cancel)
            .await
            .map(|(users, _)| users)
    }

    /// Like [`top_users`](Self::top_users), also reporting where the result came from.
    pub async fn top_users_with_source(
        &self,
        query: &Query,
        cancel: &CancellationToken,
    ) -> Result<(Vec<UserRecord>, Source), LookupError> {
        if cancel.is_cancelled() {
            return Err(LookupError::Cancelled);
        }

        let key = query.cache_key();
        let span = tracing::info_span!("lookup", key = %key, limit = query.limit);
        let start = Instant::now();

        let outcome = async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(LookupError::Cancelled),
                result = self.run(query, &key, cancel) => result,
            }
        }
        .instrument(span.clone())
        .await;

        span.in_scope(|| match &outcome {
            Ok((users, source)) => info!(
                source = ?source,
                users = users.len(),
                duration = fmt_duration(start.elapsed()),
                "Lookup served"
            ),
            Err(e) => warn!(
                error = %e,
                duration = fmt_duration(start.elapsed()),
                "Lookup failed"
            ),
        });
        outcome
    }

    async fn run(
        &self,
        query: &Query,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<(Vec<UserRecord>, Source), LookupError> {
        let limit = query.limit.min(self.max_items);

        match self.cache.read(key).await {
            Ok(lookup) if lookup.satisfies(limit) => {
                debug!("Cache hit");
                return Ok((lookup.into_users(limit), Source::Cache));
            }
            Ok(_) => debug!("Cache miss"),
            Err(e) => {
                warn!(error = %e, "Cache unavailable, fetching without lock");
                self.check_rate_limit()?;
                let users = self.fetch_upstream(query, limit, cancel).await?;
                return Ok((users, Source::Upstream));
            }
        }

        self.check_rate_limit()?;

        let lock = match self.cache.acquire_lock(key).await {
            Ok(handle) => Some(handle),
            Err(LockError::Contended { waited, .. }) => {
                debug!(waited = fmt_duration(waited), "Lock not acquired, rechecking cache");
                None
            }
            Err(LockError::Store(e)) => {
                warn!(error = %e, "Lock unavailable, fetching without lock");
                let users = self.fetch_upstream(query, limit, cancel).await?;
                return Ok((users, Source::Upstream));
            }
        };

        // Another holder may have populated the entry while we waited.
        let recheck = match self.cache.read(key).await {
            Ok(lookup) => lookup,
            Err(e) => {
                warn!(error = %e, "Cache unavailable on recheck, fetching without write-back");
                let users = self.fetch_upstream(query, limit, cancel).await;
                release(lock).await;
                return users.map(|users| (users, Source::Upstream));
            }
        };

        let Some(lock) = lock else {
            if !recheck.is_hit() {
                info!("Lock held elsewhere and cache still empty, serving empty result");
            }
            return Ok((recheck.into_users(limit), Source::CacheAfterWait));
        };

        if recheck.satisfies(limit) {
            debug!("Cache populated while waiting for lock");
            lock.release().await;
            return Ok((recheck.into_users(limit), Source::CacheAfterWait));
        }

        let fetched = self.fetch_upstream(query, limit, cancel).await;
        if let Ok(users) = &fetched
            && let Err(e) = self.cache.write(key, users, limit).await
        {
            warn!(error = %e, "Failed to write cache entry");
        }
        lock.release().await;
        fetched.map(|users| (users, Source::Upstream))
    }

    fn check_rate_limit(&self) -> Result<(), LookupError> {
        if !self.tracker.is_active() {
            return Ok(());
        }
        let retry_after = self
            .tracker
            .retry_after()
            .unwrap_or(Duration::from_secs(1));
        debug!(retry_after = fmt_duration(retry_after), "Upstream rate limit active, skipping fetch");
        Err(LookupError::RateLimited { retry_after })
    }

    /// Search, enrich and rank. Records any rate-limit rejection it sees.
    async fn fetch_upstream(
        &self,
        query: &Query,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<UserRecord>, LookupError> {
        // A lock wait may have spanned a newly recorded window.
        self.check_rate_limit()?;

        if let Err(retry_after) = self.budget.try_acquire() {
            warn!(retry_after = fmt_duration(retry_after), "Search budget exhausted");
            return Err(LookupError::BudgetExhausted { retry_after });
        }

        let location = query.location.trim();
        let identities = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LookupError::Cancelled),
            found = self.search.search_users(location, limit) => found,
        }
        .map_err(|e| self.upstream_failure(e))?;

        debug!(matches = identities.len(), "Upstream search returned");
        if identities.is_empty() {
            return Ok(Vec::new());
        }

        let records = self
            .dispatcher
            .dispatch(identities.clone(), cancel)
            .await
            .map_err(|e| match e {
                DispatchError::Cancelled => LookupError::Cancelled,
                DispatchError::Upstream(upstream) => self.upstream_failure(upstream),
            })?;

        Ok(rank(records, &identities, limit))
    }

    fn upstream_failure(&self, err: UpstreamError) -> LookupError {
        match err.rate_limit_reset() {
            Some(reset_at) => {
                self.tracker.record(reset_at);
                let retry_after = (reset_at - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    .max(Duration::from_secs(1));
                LookupError::RateLimited { retry_after }
            }
            None => LookupError::Upstream(err),
        }
    }
}

async fn release(lock: Option<LockHandle>) {
    if let Some(lock) = lock {
        lock.release().await;
    }
}

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use ghcontrib::lookup::{
    CacheCoordinator, CacheSettings, DetailFetchDispatcher, Identity, LookupService,
    RateLimitTracker, SearchBudget, UpstreamError, UserDetails, UserRecord, UserSearch,
    normalize_location,
};
use ghcontrib::store::{CacheStore, MemoryStore, StoreError};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted response for the next search calls.
#[derive(Debug, Clone)]
pub enum SearchMode {
    Normal,
    RateLimited(DateTime<Utc>),
    Failing,
}

/// Upstream directory double: a fixed set of users per location, with call counters.
pub struct FakeGitHub {
    locations: HashMap<String, Vec<(String, u32)>>,
    search_delay: Duration,
    detail_delay: Duration,
    mode: Mutex<SearchMode>,
    detail_rate_limited: AtomicBool,
    pub search_calls: AtomicUsize,
    pub detail_calls: AtomicUsize,
}

impl FakeGitHub {
    pub fn new() -> Self {
        Self {
            locations: HashMap::new(),
            search_delay: Duration::ZERO,
            detail_delay: Duration::ZERO,
            mode: Mutex::new(SearchMode::Normal),
            detail_rate_limited: AtomicBool::new(false),
            search_calls: AtomicUsize::new(0),
            detail_calls: AtomicUsize::new(0),
        }
    }

    /// Register `users` (login, public repo count) under `location`, in search order.
    pub fn with_location(mut self, location: &str, users: &[(&str, u32)]) -> Self {
        self.locations.insert(
            normalize_location(location),
            users
                .iter()
                .map(|(login, repos)| (login.to_string(), *repos))
                .collect(),
        );
        self
    }

    pub fn with_search_delay(mut self, delay: Duration) -> Self {
        self.search_delay = delay;
        self
    }

    pub fn with_detail_delay(mut self, delay: Duration) -> Self {
        self.detail_delay = delay;
        self
    }

    pub fn set_mode(&self, mode: SearchMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn rate_limit_details(&self) {
        self.detail_rate_limited.store(true, Ordering::SeqCst);
    }

    pub fn searches(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn details(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }

    fn repos_of(&self, login: &str) -> Option<u32> {
        self.locations
            .values()
            .flatten()
            .find(|(l, _)| l == login)
            .map(|(_, repos)| *repos)
    }
}

#[async_trait]
impl UserSearch for FakeGitHub {
    /// Returns every registered match, ignoring `page_size`, so ranking is
    /// exercised over more matches than requested.
    async fn search_users(
        &self,
        location: &str,
        _page_size: usize,
    ) -> Result<Vec<Identity>, UpstreamError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if !self.search_delay.is_zero() {
            tokio::time::sleep(self.search_delay).await;
        }
        let mode = self.mode.lock().unwrap().clone();
        match mode {
            SearchMode::Normal => Ok(self
                .locations
                .get(&normalize_location(location))
                .map(|users| {
                    users
                        .iter()
                        .map(|(login, _)| Identity::new(login.clone()))
                        .collect()
                })
                .unwrap_or_default()),
            SearchMode::RateLimited(reset_at) => Err(UpstreamError::RateLimited { reset_at }),
            SearchMode::Failing => Err(UpstreamError::Status {
                status: 500,
                url: "/search/users".to_owned(),
            }),
        }
    }
}

#[async_trait]
impl UserDetails for FakeGitHub {
    async fn get_user(&self, identity: &Identity) -> Result<UserRecord, UpstreamError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if !self.detail_delay.is_zero() {
            tokio::time::sleep(self.detail_delay).await;
        }
        if self.detail_rate_limited.load(Ordering::SeqCst) {
            return Err(UpstreamError::RateLimited {
                reset_at: Utc::now() + TimeDelta::seconds(30),
            });
        }
        self.repos_of(identity.login())
            .map(|repos| UserRecord::new(identity.login(), repos))
            .ok_or_else(|| UpstreamError::NotFound(identity.login().to_owned()))
    }
}

/// A [`MemoryStore`] that can be switched into failing every call.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn failing() -> Self {
        let store = Self::default();
        store.set_failing(true);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Backend("connection refused".to_owned()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheStore for FlakyStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.exists(key).await
    }

    async fn range(&self, key: &str, start: usize, stop: usize) -> Result<Vec<String>, StoreError> {
        self.check()?;
        self.inner.range(key, start, stop).await
    }

    async fn replace_list(
        &self,
        key: &str,
        items: &[String],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner.replace_list(key, items, ttl).await
    }

    async fn try_lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.try_lock(key, owner, ttl).await
    }

    async fn unlock(&self, key: &str, owner: &str) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.unlock(key, owner).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

/// A [`MemoryStore`] whose unlock takes `delay` to reach the store.
pub struct SlowUnlockStore {
    inner: MemoryStore,
    delay: Duration,
}

impl SlowUnlockStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            delay,
        }
    }
}

#[async_trait]
impl CacheStore for SlowUnlockStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.exists(key).await
    }

    async fn range(&self, key: &str, start: usize, stop: usize) -> Result<Vec<String>, StoreError> {
        self.inner.range(key, start, stop).await
    }

    async fn replace_list(
        &self,
        key: &str,
        items: &[String],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.inner.replace_list(key, items, ttl).await
    }

    async fn try_lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.inner.try_lock(key, owner, ttl).await
    }

    async fn unlock(&self, key: &str, owner: &str) -> Result<bool, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.unlock(key, owner).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    fn name(&self) -> &'static str {
        "slow-unlock"
    }
}

/// Knobs for [`build_service`]; defaults mirror production settings.
pub struct ServiceOptions {
    pub cache: CacheSettings,
    pub workers: usize,
    pub budget_per_minute: u32,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            cache: CacheSettings::default(),
            workers: 5,
            budget_per_minute: 1000,
        }
    }
}

/// Wire a [`LookupService`] around a fake upstream and the given store.
pub fn build_service(
    github: Arc<FakeGitHub>,
    store: Arc<dyn CacheStore>,
    options: ServiceOptions,
) -> LookupService {
    let max_items = options.cache.max_items;
    let tracker = Arc::new(RateLimitTracker::new());
    LookupService::new(
        github.clone(),
        DetailFetchDispatcher::new(github, tracker.clone(), options.workers),
        CacheCoordinator::new(store, options.cache),
        tracker,
        SearchBudget::per_minute(NonZeroU32::new(options.budget_per_minute).unwrap()),
        max_items,
    )
}

/// Five Berlin users whose repo counts are deliberately out of order.
pub fn berlin() -> FakeGitHub {
    FakeGitHub::new().with_location(
        "Berlin",
        &[
            ("ten", 10),
            ("fifty", 50),
            ("five", 5),
            ("twenty", 20),
            ("one", 1),
        ],
    )
}

pub fn logins(users: &[UserRecord]) -> Vec<&str> {
    users.iter().map(|u| u.login.as_str()).collect()
}

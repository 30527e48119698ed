//! Query inputs and the records the pipeline produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A location lookup as received from the caller, after clamping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub location: String,
    pub limit: usize,
}

impl Query {
    /// Build a query, clamping `limit` into `1..=max_limit`.
    pub fn new(location: impl Into<String>, limit: usize, max_limit: usize) -> Self {
        Self {
            location: location.into(),
            limit: limit.clamp(1, max_limit.max(1)),
        }
    }

    /// Cache key for this query's location.
    pub fn cache_key(&self) -> String {
        normalize_location(&self.location)
    }
}

/// Normalize a free-text location into its cache key form.
///
/// Surrounding whitespace is ignored and the key is upper-cased, so
/// `" berlin"` and `"Berlin"` share one cache entry.
pub fn normalize_location(location: &str) -> String {
    location.trim().to_uppercase()
}

/// Login handle returned by the upstream search, before enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(login: impl Into<String>) -> Self {
        Self(login.into())
    }

    pub fn login(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fully enriched user profile.
///
/// Field names follow the upstream user payload so records deserialize
/// straight from a detail response and round-trip through the cache unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub login: String,
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub public_repos: u32,
    #[serde(default)]
    pub followers: u32,
    #[serde(default)]
    pub following: u32,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    /// Minimal record with only the fields ranking depends on.
    pub fn new(login: impl Into<String>, public_repos: u32) -> Self {
        Self {
            login: login.into(),
            id: 0,
            name: None,
            avatar_url: None,
            html_url: None,
            location: None,
            public_repos,
            followers: 0,
            following: 0,
            created_at: None,
        }
    }
}

/// Sort records descending by public repository count and truncate to `limit`.
///
/// `search_order` gives each login's position in the upstream search response.
/// Records with equal repo counts keep that order; logins missing from it sort
/// after every known login with the same count.
pub fn rank(
    mut records: Vec<UserRecord>,
    search_order: &[Identity],
    limit: usize,
) -> Vec<UserRecord> {
    let position = |login: &str| {
        search_order
            .iter()
            .position(|identity| identity.login() == login)
            .unwrap_or(usize::MAX)
    };
    records.sort_by_cached_key(|r| (std::cmp::Reverse(r.public_repos), position(&r.login)));
    records.truncate(limit);
    records
}

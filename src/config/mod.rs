//! Configuration module for the ghcontrib application.
//!
//! Values come from raw environment variables (after `.env` is loaded) via
//! figment. Durations accept human strings such as `"1h"` or `"750ms"`; bare
//! integers are seconds.

use anyhow::{Context, bail};
use figment::{Figment, providers::Env};
use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::num::NonZeroU32;
use std::time::Duration;

use crate::lookup::CacheSettings;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Log level for the crate's own targets
    ///
    /// Ignored when `RUST_LOG` is set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Port for the web server
    #[serde(default = "default_port")]
    pub port: u16,
    /// Optional bearer token for the GitHub API
    #[serde(default)]
    pub github_token: Option<String>,
    /// Base URL of the GitHub REST API
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,
    /// Redis connection string; when unset an in-process store is used
    #[serde(default)]
    pub redis_url: Option<String>,

    #[serde(default = "default_cache_ttl", deserialize_with = "deserialize_duration")]
    pub cache_ttl: Duration,
    #[serde(
        default = "default_empty_cache_ttl",
        deserialize_with = "deserialize_duration"
    )]
    pub empty_cache_ttl: Duration,
    /// Timeout applied to each individual store operation
    #[serde(
        default = "default_cache_op_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub cache_op_timeout: Duration,
    #[serde(default = "default_lock_ttl", deserialize_with = "deserialize_duration")]
    pub lock_ttl: Duration,
    /// How long a request keeps retrying a held lock
    #[serde(default = "default_lock_wait", deserialize_with = "deserialize_duration")]
    pub lock_wait: Duration,

    /// Concurrent detail fetches per upstream lookup
    #[serde(default = "default_detail_workers")]
    pub detail_workers: usize,
    /// Upper bound for the `items` parameter and the upstream page size
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    /// `items` used when the caller omits it or sends garbage
    #[serde(default = "default_items")]
    pub default_items: usize,
    /// Upstream searches allowed per minute across the process
    #[serde(default = "default_search_budget")]
    pub search_budget_per_minute: u32,

    /// Graceful shutdown timeout
    ///
    /// Accepts both numeric values (seconds) and duration strings.
    /// Defaults to 8 seconds if not specified.
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    10000
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_empty_cache_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_cache_op_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_lock_ttl() -> Duration {
    Duration::from_secs(30)
}

fn default_lock_wait() -> Duration {
    Duration::from_secs(5)
}

fn default_detail_workers() -> usize {
    5
}

fn default_max_items() -> usize {
    100
}

fn default_items() -> usize {
    10
}

fn default_search_budget() -> u32 {
    30
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(Figment::new().merge(Env::raw()))
    }

    /// Extract and validate configuration from an arbitrary figment.
    pub fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let config: Config = figment.extract().context("Failed to load config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.detail_workers == 0 {
            bail!("DETAIL_WORKERS must be at least 1");
        }
        if self.max_items == 0 {
            bail!("MAX_ITEMS must be at least 1");
        }
        if self.default_items == 0 || self.default_items > self.max_items {
            bail!(
                "DEFAULT_ITEMS must be between 1 and MAX_ITEMS ({})",
                self.max_items
            );
        }
        if self.search_budget_per_minute == 0 {
            bail!("SEARCH_BUDGET_PER_MINUTE must be at least 1");
        }
        if self.lock_ttl.is_zero() || self.cache_ttl.is_zero() || self.empty_cache_ttl.is_zero()
        {
            bail!("CACHE_TTL, EMPTY_CACHE_TTL and LOCK_TTL must be non-zero");
        }
        Ok(())
    }

    pub fn search_budget(&self) -> NonZeroU32 {
        NonZeroU32::new(self.search_budget_per_minute).unwrap_or(NonZeroU32::MIN)
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            ttl: self.cache_ttl,
            empty_ttl: self.empty_cache_ttl,
            op_timeout: self.cache_op_timeout,
            lock_ttl: self.lock_ttl,
            lock_wait: self.lock_wait,
            max_items: self.max_items,
        }
    }
}

/// Duration parser configured for "1h", "5m", "30s", "750ms" style values.
const DURATION_PARSER: DurationParser<'static> = DurationParser::builder()
    .time_units(&[
        TimeUnit::MilliSecond,
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
        TimeUnit::Day,
    ])
    .build();

/// Parse a human-readable duration; a bare number is seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    DURATION_PARSER
        .parse(value)
        .map_err(|e| format!("Invalid duration '{value}': {e}"))?
        .try_into()
        .map_err(|e| format!("Duration out of range '{value}': {e}"))
}

/// Deserializes either an integer count of seconds or a duration string.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct DurationVisitor;

    impl Visitor<'_> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a duration string or a number of seconds")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Duration, E> {
            u64::try_from(value)
                .map(Duration::from_secs)
                .map_err(|_| E::custom(format!("Duration cannot be negative: {value}")))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
            parse_duration(value).map_err(E::custom)
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

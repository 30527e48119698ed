//! Contracts the pipeline needs from the upstream user directory.

use crate::lookup::models::{Identity, UserRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Failure of a single upstream call.
///
/// Rate-limit rejections are a distinct variant so callers can record the
/// cooldown instead of treating them as ordinary failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream rate limit active until {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },
    #[error("upstream resource not found: {0}")]
    NotFound(String),
    #[error("upstream returned status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("failed to parse upstream response from {url}: {message}")]
    Parse { url: String, message: String },
    #[error("upstream transport error: {0}")]
    Transport(String),
}

impl UpstreamError {
    /// Reset time if this error is a rate-limit rejection.
    pub fn rate_limit_reset(&self) -> Option<DateTime<Utc>> {
        match self {
            UpstreamError::RateLimited { reset_at } => Some(*reset_at),
            _ => None,
        }
    }
}

/// Location search against the upstream directory.
#[async_trait]
pub trait UserSearch: Send + Sync {
    /// Return up to `page_size` identities registered under `location`,
    /// in the upstream's relevance order.
    async fn search_users(
        &self,
        location: &str,
        page_size: usize,
    ) -> Result<Vec<Identity>, UpstreamError>;
}

/// Per-user detail lookup, invoked once per identity by dispatcher workers.
#[async_trait]
pub trait UserDetails: Send + Sync {
    async fn get_user(&self, identity: &Identity) -> Result<UserRecord, UpstreamError>;
}

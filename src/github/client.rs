//! HTTP client for the GitHub REST API.

use crate::github::json::parse_json_with_context;
use crate::github::middleware::TransactionLogMiddleware;
use crate::github::models::SearchResponse;
use crate::lookup::{Identity, UpstreamError, UserDetails, UserRecord, UserSearch};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use http::{HeaderMap, HeaderValue, StatusCode, header};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

const API_VERSION: &str = "2022-11-28";

/// Cooldown assumed for a 429 that carries no reset information.
const DEFAULT_COOLDOWN: TimeDelta = TimeDelta::seconds(60);

/// Main entry point for upstream searches and user detail lookups.
pub struct GitHubApi {
    http: ClientWithMiddleware,
    base_url: Url,
}

impl GitHubApi {
    /// Build a client against `base_url`, authenticating with `token` if given.
    pub fn new(base_url: &str, token: Option<&str>) -> anyhow::Result<Self> {
        // `Url::join` drops the last path segment unless the base ends in '/'.
        let base_url = if base_url.ends_with('/') {
            Url::parse(base_url)
        } else {
            Url::parse(&format!("{base_url}/"))
        }
        .with_context(|| format!("Invalid GitHub API URL: {base_url}"))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .context("GitHub token contains invalid header characters")?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("ghcontrib/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to create HTTP client")?;

        let http = ClientBuilder::new(client)
            .with(TransactionLogMiddleware)
            .build();

        Ok(Self { http, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, UpstreamError> {
        self.base_url
            .join(path)
            .map_err(|e| UpstreamError::Transport(format!("invalid endpoint {path}: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        resource: &str,
    ) -> Result<T, UpstreamError> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = response.status();
        if let Some(reset_at) = rate_limit_reset(status, response.headers(), Utc::now()) {
            return Err(UpstreamError::RateLimited { reset_at });
        }
        if status == StatusCode::NOT_FOUND {
            return Err(UpstreamError::NotFound(resource.to_owned()));
        }
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                url: url.path().to_owned(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        parse_json_with_context(&body).map_err(|message| UpstreamError::Parse {
            url: url.path().to_owned(),
            message,
        })
    }
}

#[async_trait]
impl UserSearch for GitHubApi {
    async fn search_users(
        &self,
        location: &str,
        page_size: usize,
    ) -> Result<Vec<Identity>, UpstreamError> {
        let mut url = self.endpoint("search/users")?;
        url.query_pairs_mut()
            .append_pair("q", &search_query(location))
            .append_pair("sort", "repos")
            .append_pair("order", "desc")
            .append_pair("per_page", &page_size.clamp(1, 100).to_string())
            .append_pair("page", "1");

        let response: SearchResponse = self.get_json(url, location).await?;
        debug!(
            location,
            total_count = response.total_count,
            returned = response.items.len(),
            incomplete = response.incomplete_results,
            "Search response"
        );
        Ok(response.into_identities())
    }
}

#[async_trait]
impl UserDetails for GitHubApi {
    async fn get_user(&self, identity: &Identity) -> Result<UserRecord, UpstreamError> {
        let mut url = self.endpoint("users/")?;
        url.path_segments_mut()
            .map_err(|_| UpstreamError::Transport("base URL cannot have paths".to_owned()))?
            .pop_if_empty()
            .push(identity.login());
        self.get_json(url, identity.login()).await
    }
}

/// Search qualifier for users registered under `location`.
///
/// Multi-word locations are quoted so the upstream treats them as one term.
pub fn search_query(location: &str) -> String {
    let location = location.trim().replace('"', "");
    if location.contains(char::is_whitespace) {
        format!("location:\"{location}\" type:user")
    } else {
        format!("location:{location} type:user")
    }
}

/// Reset time for a rate-limited response, or `None` if `status` is not a
/// rate-limit rejection.
///
/// Secondary limits send `retry-after` (seconds); primary limits send
/// `x-ratelimit-remaining: 0` with `x-ratelimit-reset` as epoch seconds.
pub fn rate_limit_reset(
    status: StatusCode,
    headers: &HeaderMap,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if status != StatusCode::FORBIDDEN && status != StatusCode::TOO_MANY_REQUESTS {
        return None;
    }
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if let Some(secs) = header_str("retry-after").and_then(|v| v.trim().parse::<i64>().ok()) {
        return Some(now + TimeDelta::seconds(secs.max(1)));
    }

    if header_str("x-ratelimit-remaining").map(str::trim) == Some("0")
        && let Some(reset) = header_str("x-ratelimit-reset")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    {
        return Some(reset.max(now + TimeDelta::seconds(1)));
    }

    // A bare 403 is a permissions problem, not a rate limit.
    (status == StatusCode::TOO_MANY_REQUESTS).then(|| now + DEFAULT_COOLDOWN)
}

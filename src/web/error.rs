//! JSON error responses for the HTTP surface.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

use crate::lookup::LookupError;

/// Machine-readable error codes returned in [`ApiError`] bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    RateLimited,
    BudgetExhausted,
    UpstreamFailed,
    Cancelled,
    InvalidLocation,
    NotFound,
}

impl ApiErrorCode {
    fn status(self) -> StatusCode {
        match self {
            ApiErrorCode::RateLimited | ApiErrorCode::BudgetExhausted => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ApiErrorCode::UpstreamFailed => StatusCode::BAD_GATEWAY,
            ApiErrorCode::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            ApiErrorCode::InvalidLocation => StatusCode::BAD_REQUEST,
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
    #[serde(skip)]
    pub retry_after: Option<Duration>,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// Whole seconds for a `Retry-After` header, rounded up and never zero.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.code.status();
        let retry_after = self.retry_after;
        let mut response = (status, Json(self)).into_response();
        if let Some(retry_after) = retry_after {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after_secs(retry_after)),
            );
        }
        response
    }
}

impl From<LookupError> for ApiError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::RateLimited { retry_after } => ApiError::new(
                ApiErrorCode::RateLimited,
                "Upstream rate limit reached, try again later",
            )
            .with_retry_after(retry_after),
            LookupError::BudgetExhausted { retry_after } => ApiError::new(
                ApiErrorCode::BudgetExhausted,
                "Too many new lookups, try again in a few minutes",
            )
            .with_retry_after(retry_after),
            LookupError::Upstream(source) => {
                // The transport detail stays in the logs, never in the body.
                warn!(error = %source, "Lookup failed upstream");
                ApiError::new(ApiErrorCode::UpstreamFailed, "Failed to fetch users")
            }
            LookupError::Cancelled => {
                ApiError::new(ApiErrorCode::Cancelled, "Lookup was cancelled")
            }
        }
    }
}

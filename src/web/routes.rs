//! Web API router construction and shared response utilities.

use axum::{
    Router,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;

use crate::state::AppState;
use crate::web::middleware::request_id::RequestIdLayer;
use crate::web::{status, top};

/// Path template returned to callers who hit an unknown route.
pub const USAGE: &str = "/top/{location}?items=10";

/// Whole-request deadline, including time spent waiting on a location lock.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Cache-Control presets for public endpoints.
pub mod cache {
    /// Ranked results; the server-side cache already holds them for an hour.
    pub const TOP: &str = "public, max-age=60, stale-while-revalidate=120";
}

/// Wraps a JSON response with a `Cache-Control` header.
pub fn with_cache_control<T: serde::Serialize>(value: T, header: &'static str) -> Response {
    let mut response = Json(value).into_response();
    response.headers_mut().insert(
        axum::http::header::CACHE_CONTROL,
        HeaderValue::from_static(header),
    );
    response
}

/// Creates the web server router
pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/top/{location}", get(top::top_users))
        .route("/health", get(status::health))
        .fallback(usage_fallback)
        .with_state(app_state)
        .layer((
            // Outermost: per-request ID span + severity-proportional response logging.
            RequestIdLayer,
            request_timeout(REQUEST_TIMEOUT),
        ))
}

/// Requests running past `limit` are answered with 408.
fn request_timeout(limit: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, limit)
}

/// Any unknown path answers with the one supported route.
async fn usage_fallback() -> Response {
    (StatusCode::NOT_FOUND, Json(USAGE)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_slow_request_times_out_with_408() {
        let router = Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "done"
                }),
            )
            .layer(request_timeout(Duration::from_millis(50)));

        let response = router
            .oneshot(Request::get("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }
}

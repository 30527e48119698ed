//! HTTP surface tests, driven in-process through the router.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::{TimeDelta, Utc};
use ghcontrib::state::AppState;
use ghcontrib::store::MemoryStore;
use ghcontrib::web::create_router;
use helpers::{FakeGitHub, SearchMode, ServiceOptions, berlin, build_service};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

fn app(github: Arc<FakeGitHub>) -> axum::Router {
    let service = build_service(
        github,
        Arc::new(MemoryStore::new()),
        ServiceOptions::default(),
    );
    create_router(AppState::new(Arc::new(service), 2))
}

async fn get(router: axum::Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = router
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, serde_json::from_slice(&bytes).unwrap())
}

fn logins(body: &Value) -> Vec<&str> {
    body.as_array()
        .unwrap()
        .iter()
        .map(|u| u["login"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn top_returns_ranked_json() {
    let (status, headers, body) = get(app(Arc::new(berlin())), "/top/berlin?items=3").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(logins(&body), ["fifty", "twenty", "ten"]);
    assert_eq!(body[0]["public_repos"], 50);
    assert!(headers.contains_key(header::CACHE_CONTROL));
    assert!(headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn missing_or_garbled_items_use_default() {
    let router = app(Arc::new(berlin()));
    for uri in ["/top/Berlin", "/top/Berlin?items=lots", "/top/Berlin?items=-4"] {
        let (status, _, body) = get(router.clone(), uri).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert_eq!(body.as_array().unwrap().len(), 2, "{uri}");
    }
}

#[tokio::test]
async fn items_are_clamped_to_at_least_one() {
    let (status, _, body) = get(app(Arc::new(berlin())), "/top/Berlin?items=0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logins(&body), ["fifty"]);
}

#[tokio::test]
async fn multi_word_location_is_decoded() {
    let github = Arc::new(FakeGitHub::new().with_location("San Francisco", &[("sf", 7)]));
    let (status, _, body) = get(app(github), "/top/San%20Francisco?items=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logins(&body), ["sf"]);
}

#[tokio::test]
async fn rate_limit_maps_to_429_with_retry_after() {
    let github = Arc::new(berlin());
    github.set_mode(SearchMode::RateLimited(Utc::now() + TimeDelta::seconds(120)));

    let (status, headers, body) = get(app(github), "/top/Berlin").await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "RATE_LIMITED");
    let retry_after: u64 = headers[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((100..=120).contains(&retry_after));
}

#[tokio::test]
async fn upstream_failure_maps_to_generic_502() {
    let github = Arc::new(berlin());
    github.set_mode(SearchMode::Failing);

    let (status, headers, body) = get(app(github), "/top/Berlin").await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "UPSTREAM_FAILED");
    assert!(!body["message"].as_str().unwrap().contains("500"));
    assert!(!headers.contains_key(header::RETRY_AFTER));
}

#[tokio::test]
async fn blank_location_is_rejected() {
    let (status, _, body) = get(app(Arc::new(berlin())), "/top/%20%20").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_LOCATION");
}

#[tokio::test]
async fn unknown_path_returns_usage_hint() {
    let (status, _, body) = get(app(Arc::new(berlin())), "/contributors").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, Value::from("/top/{location}?items=10"));
}

#[tokio::test]
async fn health_reports_store_backend() {
    let (status, _, body) = get(app(Arc::new(berlin())), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"]["backend"], "memory");
    assert_eq!(body["store"]["ok"], true);
    assert!(body.get("rate_limited_for").is_none());
}

#[tokio::test]
async fn inbound_request_id_is_echoed() {
    let response = app(Arc::new(berlin()))
        .oneshot(
            Request::get("/health")
                .header("x-request-id", "edge-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "edge-42");
}

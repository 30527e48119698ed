//! Health handler.

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;
use std::time::Duration;
use tracing::{trace, warn};

use crate::state::AppState;

/// Upper bound on the store ping so a hung backend cannot hang the health check.
const PING_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Serialize)]
pub struct StoreHealth {
    backend: &'static str,
    ok: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: HealthStatus,
    version: &'static str,
    commit: &'static str,
    store: StoreHealth,
    /// Seconds until the upstream rate-limit window ends, when one is active.
    #[serde(skip_serializing_if = "Option::is_none")]
    rate_limited_for: Option<u64>,
}

/// Health check endpoint.
///
/// A failing store reports `degraded` rather than an error status: lookups
/// still work without the cache, just without stampede protection.
pub(super) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    trace!("health check requested");
    let store = state.lookup.cache().store();

    let ok = match tokio::time::timeout(PING_TIMEOUT, store.ping()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(backend = store.name(), error = %e, "Store ping failed");
            false
        }
        Err(_) => {
            warn!(backend = store.name(), "Store ping timed out");
            false
        }
    };

    Json(HealthResponse {
        status: if ok {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        },
        version: env!("CARGO_PKG_VERSION"),
        commit: env!("GIT_COMMIT_HASH"),
        store: StoreHealth {
            backend: store.name(),
            ok,
        },
        rate_limited_for: state
            .lookup
            .tracker()
            .retry_after()
            .map(|d| d.as_secs().max(1)),
    })
}

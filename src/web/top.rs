//! `GET /top/{location}` handler.

use axum::extract::{Path, Query, State};
use axum::response::Response;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::lookup;
use crate::state::AppState;
use crate::web::error::{ApiError, ApiErrorCode};
use crate::web::routes::{cache, with_cache_control};

#[derive(Debug, Default, Deserialize)]
pub struct TopParams {
    /// Kept as a string so garbage falls back to the default instead of a 400.
    pub items: Option<String>,
}

/// Requested item count, or `default` when absent or not a non-negative integer.
pub fn requested_items(raw: Option<&str>, default: usize) -> usize {
    raw.and_then(|s| s.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

/// Ranked top users for a location.
pub(super) async fn top_users(
    State(state): State<AppState>,
    Path(location): Path<String>,
    Query(params): Query<TopParams>,
) -> Result<Response, ApiError> {
    if location.trim().is_empty() {
        return Err(ApiError::new(
            ApiErrorCode::InvalidLocation,
            "Location must not be empty",
        ));
    }

    let limit = requested_items(params.items.as_deref(), state.default_items);
    let query = lookup::Query::new(location, limit, state.lookup.max_items());

    // Dropping the handler future (client gone, timeout layer) cancels the lookup.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let users = state.lookup.top_users(&query, &cancel).await?;
    Ok(with_cache_control(users, cache::TOP))
}

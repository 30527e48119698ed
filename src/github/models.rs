//! Wire types for the upstream search endpoint.

use crate::lookup::Identity;
use serde::Deserialize;

/// Response from `GET /search/users`.
#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub total_count: u64,
    #[serde(default)]
    pub incomplete_results: bool,
    pub items: Vec<SearchItem>,
}

/// One match in a search response. Only the login is needed downstream.
#[derive(Debug, Deserialize)]
pub struct SearchItem {
    pub login: String,
}

impl SearchResponse {
    pub fn into_identities(self) -> Vec<Identity> {
        self.items
            .into_iter()
            .map(|item| Identity::new(item.login))
            .collect()
    }
}

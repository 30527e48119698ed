//! Application state shared across request handlers.

use crate::lookup::LookupService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub lookup: Arc<LookupService>,
    /// `items` used when a request omits it or sends something unparsable.
    pub default_items: usize,
}

impl AppState {
    pub fn new(lookup: Arc<LookupService>, default_items: usize) -> Self {
        let default_items = default_items.clamp(1, lookup.max_items());
        Self {
            lookup,
            default_items,
        }
    }
}

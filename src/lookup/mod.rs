//! The lookup-and-fetch pipeline: cache, lock, rate limits, and enrichment.

pub mod cache;
pub mod dispatcher;
pub mod models;
pub mod rate_limit;
pub mod service;
pub mod upstream;

pub use cache::{CacheCoordinator, CacheLookup, CacheSettings, LockError, LockHandle};
pub use dispatcher::{DetailFetchDispatcher, DispatchError};
pub use models::{Identity, Query, UserRecord, normalize_location, rank};
pub use rate_limit::{RateLimitTracker, SearchBudget};
pub use service::{LookupError, LookupService, Source};
pub use upstream::{UpstreamError, UserDetails, UserSearch};

//! Outbound rate-limit state for the upstream service.
//!
//! Two independent guards live here:
//!
//! 1. [`RateLimitTracker`] -- the cooldown window the upstream declared in its
//!    last rejection. Cleared lazily once the reset time passes.
//! 2. [`SearchBudget`] -- a client-side token bucket on search calls so a burst
//!    of cold locations cannot spend the whole per-minute allowance at once.

use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter, clock::Clock, clock::DefaultClock};
use std::num::NonZeroU32;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

/// Process-wide record of an active upstream backoff window.
///
/// Created once at startup and shared by reference; never blocks on I/O.
#[derive(Debug, Default)]
pub struct RateLimitTracker {
    reset_at: Mutex<Option<DateTime<Utc>>>,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the upstream is currently refusing work.
    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    /// Like [`is_active`](Self::is_active) against an explicit clock reading.
    /// Clears the stored window once `now` reaches its reset time.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        let mut window = self.reset_at.lock().unwrap_or_else(PoisonError::into_inner);
        match *window {
            Some(reset_at) if now < reset_at => true,
            Some(reset_at) => {
                *window = None;
                debug!(%reset_at, "Upstream rate limit window expired");
                false
            }
            None => false,
        }
    }

    /// Reset time of the window if it is still active.
    pub fn active_until(&self) -> Option<DateTime<Utc>> {
        let now = Utc::now();
        if self.is_active_at(now) {
            self.current()
        } else {
            None
        }
    }

    /// Record an upstream rejection, replacing any previous window.
    pub fn record(&self, reset_at: DateTime<Utc>) {
        let mut window = self.reset_at.lock().unwrap_or_else(PoisonError::into_inner);
        *window = Some(reset_at);
        info!(%reset_at, "Upstream rate limit recorded");
    }

    /// Reset time of the stored window, if any. Does not clear expired windows.
    pub fn current(&self) -> Option<DateTime<Utc>> {
        *self.reset_at.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time left in the active window, measured from `now`.
    pub fn retry_after_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.current()
            .and_then(|reset_at| (reset_at - now).to_std().ok())
            .filter(|d| !d.is_zero())
    }

    /// Time left in the active window.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_at(Utc::now())
    }
}

/// Client-side allowance for upstream search calls.
///
/// Non-blocking: an exhausted budget is reported immediately with the time
/// until the next call would be admitted.
pub struct SearchBudget {
    limiter: governor::DefaultDirectRateLimiter,
}

impl SearchBudget {
    /// `per_minute` searches per minute, all of which may be spent in a burst.
    pub fn per_minute(per_minute: NonZeroU32) -> Self {
        Self {
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
        }
    }

    /// Take one search from the budget, or return how long until one is free.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(DefaultClock::default().now()))
    }
}

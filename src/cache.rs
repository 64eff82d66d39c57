//! Single-value cache with a time-to-live.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::future::Future;
use tracing::{debug, warn};

/// Holds the last successfully refreshed value. Once `ttl` has elapsed the
/// next read refreshes it in full; a failed refresh is returned to the
/// caller and the stale value is never served in its place.
pub struct TtlCache<T> {
    value: Option<T>,
    fetched_at: Option<DateTime<Utc>>,
    ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            value: None,
            fetched_at: None,
            ttl,
        }
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    /// True when a value is held and was fetched less than `ttl` before `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match (&self.value, self.fetched_at) {
            (Some(_), Some(at)) => now - at < self.ttl,
            _ => false,
        }
    }

    /// Returns the cached value while fresh, otherwise awaits `refresh` and
    /// stores its result.
    pub async fn get_or_refresh<F, Fut>(&mut self, now: DateTime<Utc>, refresh: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.value.as_ref().filter(|_| self.is_fresh(now)) {
            return Ok(value.clone());
        }

        debug!(fetched_at = ?self.fetched_at, "Cache expired, refreshing");
        match refresh().await {
            Ok(value) => {
                self.value = Some(value.clone());
                self.fetched_at = Some(now);
                Ok(value)
            }
            Err(e) => {
                // Drop the stale value so a later read cannot return it.
                self.value = None;
                self.fetched_at = None;
                warn!(error = %e, "Cache refresh failed");
                Err(e)
            }
        }
    }

    pub fn invalidate(&mut self) {
        self.value = None;
        self.fetched_at = None;
    }
}

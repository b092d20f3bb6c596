//! Rate Limiting
//!
//! Per-client request budget keyed by IP, backed by a `governor` GCRA
//! limiter. A client may burst `max_requests` at once and earns one request
//! back every `window / max_requests`.

use governor::{DefaultKeyedRateLimiter, Quota};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::time::Duration;

use crate::error::{PaymentError, Result};

/// Per-client request limiter
///
/// Requests with no identifiable client share the `None` bucket.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    limiter: DefaultKeyedRateLimiter<Option<IpAddr>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Result<Self> {
        let Some(burst) = NonZeroU32::new(max_requests) else {
            return Err(PaymentError::Config("rate limit must allow at least one request".into()));
        };
        let Some(quota) = Quota::with_period(window / max_requests) else {
            return Err(PaymentError::Config("rate limit window must not be zero".into()));
        };

        Ok(Self {
            max_requests,
            window,
            limiter: governor::RateLimiter::keyed(quota.allow_burst(burst)),
        })
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count one request, failing once the client's budget is spent
    pub fn hit(&self, client: Option<IpAddr>) -> Result<()> {
        self.limiter.check_key(&client).map_err(|_| {
            tracing::debug!(client = ?client, limit = self.max_requests, "Rate limit reached");
            PaymentError::RateLimited
        })
    }

    /// Drop clients whose budget has fully refilled
    ///
    /// Returns how many were dropped. Call this on a timer so the key set
    /// stays bounded by the clients seen in one window.
    pub fn sweep(&self) -> usize {
        let before = self.limiter.len();
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        let dropped = before.saturating_sub(self.limiter.len());
        if dropped > 0 {
            tracing::debug!(dropped, remaining = self.limiter.len(), "Swept rate limit buckets");
        }
        dropped
    }

    /// Number of clients currently tracked
    pub fn tracked(&self) -> usize {
        self.limiter.len()
    }
}

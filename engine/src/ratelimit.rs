//! Per-caller request limiter

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use governor::{DefaultKeyedRateLimiter, Quota};

use crate::errors::EngineError;

/// Checks between sweeps of fully replenished keys
const SWEEP_EVERY: u64 = 256;

/// Allows `max` requests per key over each window, refilling one slot every
/// `window / max`
pub struct RateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
    checks: AtomicU64,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("tracked_keys", &self.limiter.len())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Result<Self, EngineError> {
        let burst = NonZeroU32::new(max).ok_or_else(|| EngineError::Config("rate limit max must be positive".to_string()))?;
        let quota = Quota::with_period(window / max)
            .ok_or_else(|| EngineError::Config("rate limit window must be positive".to_string()))?
            .allow_burst(burst);

        Ok(Self {
            limiter: governor::RateLimiter::keyed(quota),
            checks: AtomicU64::new(0),
        })
    }

    /// Consume one request for `key`
    pub fn allow(&self, key: &str) -> bool {
        let allowed = self.limiter.check_key(&key.to_string()).is_ok();
        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.prune();
        }
        allowed
    }

    /// Like [`allow`](Self::allow), failing with `RateLimited`
    pub fn check(&self, key: &str) -> Result<(), EngineError> {
        if self.allow(key) {
            Ok(())
        } else {
            Err(EngineError::RateLimited(format!("too many requests for {}", key)))
        }
    }

    /// Forget keys whose budget has fully refilled
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    pub fn tracked_keys(&self) -> usize {
        self.limiter.len()
    }
}

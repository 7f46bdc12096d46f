//! Constructor for the supported algorithms under a shared key prefix.

use crate::algorithms::{Algorithm, FixedWindow, SlidingWindow, TokenBucket};
use crate::error::Result;
use crate::units::TimeUnit;

pub const DEFAULT_PREFIX: &str = "ratelimit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limiter {
    prefix: String,
}

impl Default for Limiter {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl Limiter {
    /// `prefix` namespaces every key the algorithms write.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Windows are aligned to multiples of `window` since the UNIX epoch.
    /// Each window allows `max_requests`.
    pub fn fixed_window(&self, max_requests: u64, window: u64, unit: TimeUnit) -> Result<Algorithm> {
        FixedWindow::new(self.prefix.clone(), max_requests, window, unit).map(Algorithm::from)
    }

    /// Weighted blend of the current and previous fixed window, which
    /// smooths out bursts at window boundaries.
    pub fn sliding_window(&self, max_requests: u64, window: u64, unit: TimeUnit) -> Result<Algorithm> {
        SlidingWindow::new(self.prefix.clone(), max_requests, window, unit).map(Algorithm::from)
    }

    /// A bucket of `max_tokens` refilled with `refill_rate` tokens every
    /// `interval`.
    pub fn token_bucket(
        &self,
        max_tokens: u64,
        refill_rate: u64,
        interval: u64,
        unit: TimeUnit,
    ) -> Result<Algorithm> {
        TokenBucket::new(self.prefix.clone(), max_tokens, refill_rate, interval, unit).map(Algorithm::from)
    }
}

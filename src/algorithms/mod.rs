//! Rate limiting algorithms module
//!
//! Each algorithm is a pure description of its store interaction: it builds
//! the script call for a decision or metadata query from `(identifier, now)`
//! and turns the store's raw reply into a result. The store call itself
//! happens in [`crate::ratelimit`], the only place where the async and the
//! blocking paths differ.

pub mod fixed_window;
pub mod queries;
pub mod sliding_window;
pub mod token_bucket;

use crate::error::{RateLimitError, Result};
use crate::response::Response;
use crate::script::{Reply, ScriptCall};
use crate::units::{to_millis, TimeUnit};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

pub use fixed_window::FixedWindow;
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;

/// Rate limit strategy enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    FixedWindow,
    SlidingWindow,
    TokenBucket,
}

impl AlgorithmKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlgorithmKind::FixedWindow => "fixed_window",
            AlgorithmKind::SlidingWindow => "sliding_window",
            AlgorithmKind::TokenBucket => "token_bucket",
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmKind {
    type Err = RateLimitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "fixed_window" => Ok(AlgorithmKind::FixedWindow),
            "sliding_window" => Ok(AlgorithmKind::SlidingWindow),
            "token_bucket" => Ok(AlgorithmKind::TokenBucket),
            other => Err(RateLimitError::configuration(format!(
                "Unknown algorithm '{}'. Must be one of: fixed_window, sliding_window, token_bucket",
                other
            ))),
        }
    }
}

/// The closed set of supported algorithms, dispatched statically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Algorithm {
    FixedWindow(FixedWindow),
    SlidingWindow(SlidingWindow),
    TokenBucket(TokenBucket),
}

impl Algorithm {
    pub fn kind(&self) -> AlgorithmKind {
        match self {
            Algorithm::FixedWindow(_) => AlgorithmKind::FixedWindow,
            Algorithm::SlidingWindow(_) => AlgorithmKind::SlidingWindow,
            Algorithm::TokenBucket(_) => AlgorithmKind::TokenBucket,
        }
    }

    /// Requests per window, or bucket capacity.
    pub fn limit(&self) -> u64 {
        match self {
            Algorithm::FixedWindow(algorithm) => algorithm.max_requests(),
            Algorithm::SlidingWindow(algorithm) => algorithm.max_requests(),
            Algorithm::TokenBucket(algorithm) => algorithm.max_tokens(),
        }
    }

    pub fn limit_call(&self, identifier: &str, now: u64, cost: i64) -> ScriptCall {
        match self {
            Algorithm::FixedWindow(algorithm) => algorithm.limit_call(identifier, now, cost),
            Algorithm::SlidingWindow(algorithm) => algorithm.limit_call(identifier, now, cost),
            Algorithm::TokenBucket(algorithm) => algorithm.limit_call(identifier, now, cost),
        }
    }

    pub fn limit_response(&self, reply: Reply, now: u64) -> Result<Response> {
        match self {
            Algorithm::FixedWindow(algorithm) => algorithm.limit_response(reply, now),
            Algorithm::SlidingWindow(algorithm) => algorithm.limit_response(reply, now),
            Algorithm::TokenBucket(algorithm) => algorithm.limit_response(reply),
        }
    }

    pub fn remaining_call(&self, identifier: &str, now: u64) -> ScriptCall {
        match self {
            Algorithm::FixedWindow(algorithm) => algorithm.remaining_call(identifier, now),
            Algorithm::SlidingWindow(algorithm) => algorithm.remaining_call(identifier, now),
            Algorithm::TokenBucket(algorithm) => algorithm.remaining_call(identifier),
        }
    }

    pub fn remaining_from(&self, reply: Reply, now: u64) -> Result<u64> {
        match self {
            Algorithm::FixedWindow(algorithm) => algorithm.remaining_from(reply),
            Algorithm::SlidingWindow(algorithm) => algorithm.remaining_from(reply, now),
            Algorithm::TokenBucket(algorithm) => algorithm.remaining_from(reply, now),
        }
    }

    pub fn reset_call(&self, identifier: &str, now: u64) -> ScriptCall {
        match self {
            Algorithm::FixedWindow(algorithm) => algorithm.reset_call(identifier, now),
            Algorithm::SlidingWindow(algorithm) => algorithm.reset_call(identifier, now),
            Algorithm::TokenBucket(algorithm) => algorithm.reset_call(identifier),
        }
    }

    pub fn reset_from(&self, reply: Reply, now: u64) -> Result<Option<u64>> {
        match self {
            Algorithm::FixedWindow(algorithm) => algorithm.reset_from(reply, now),
            Algorithm::SlidingWindow(algorithm) => algorithm.reset_from(reply, now),
            Algorithm::TokenBucket(algorithm) => algorithm.reset_from(reply, now),
        }
    }
}

impl From<FixedWindow> for Algorithm {
    fn from(algorithm: FixedWindow) -> Self {
        Algorithm::FixedWindow(algorithm)
    }
}

impl From<SlidingWindow> for Algorithm {
    fn from(algorithm: SlidingWindow) -> Self {
        Algorithm::SlidingWindow(algorithm)
    }
}

impl From<TokenBucket> for Algorithm {
    fn from(algorithm: TokenBucket) -> Self {
        Algorithm::TokenBucket(algorithm)
    }
}

/// Request cost as a script argument. Must be at least 1.
pub(crate) fn validate_cost(cost: u64) -> Result<i64> {
    if cost == 0 {
        return Err(RateLimitError::invalid_argument("Cost must be greater than 0"));
    }
    i64::try_from(cost).map_err(|_| RateLimitError::invalid_argument("Cost is too large"))
}

fn positive(name: &str, value: u64) -> Result<u64> {
    if value == 0 {
        return Err(RateLimitError::configuration(format!("{} must be greater than 0", name)));
    }
    if i64::try_from(value).is_err() {
        return Err(RateLimitError::configuration(format!("{} is too large", name)));
    }
    Ok(value)
}

fn positive_millis(name: &str, value: u64, unit: TimeUnit) -> Result<u64> {
    positive(name, value)?;
    positive(name, to_millis(value, unit)?)
}

/// Surfaced remaining count: never negative, never above the limit.
fn clamp_remaining(raw: i64, limit: u64) -> u64 {
    (raw.max(0) as u64).min(limit)
}

use crate::error::{RateLimitError, Result};

/// Validates configuration values for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a Redis URL
    pub fn validate_redis_url(url: &str) -> Result<()> {
        if url.is_empty() {
            return Err(RateLimitError::configuration("Redis URL cannot be empty"));
        }

        let schemes = ["redis://", "rediss://", "redis+unix://", "unix://"];
        if !schemes.iter().any(|scheme| url.starts_with(scheme)) {
            return Err(RateLimitError::configuration(format!(
                "Redis URL must start with one of: {:?}",
                schemes
            )));
        }

        Ok(())
    }

    /// Validates the key prefix
    pub fn validate_prefix(prefix: &str) -> Result<()> {
        if prefix.trim().is_empty() {
            return Err(RateLimitError::configuration("Key prefix cannot be empty"));
        }

        if prefix.chars().any(char::is_whitespace) {
            return Err(RateLimitError::configuration("Key prefix cannot contain whitespace"));
        }

        Ok(())
    }

    /// Validates fixed and sliding window parameters
    pub fn validate_window(limit: u64, window: u64) -> Result<()> {
        if limit == 0 {
            return Err(RateLimitError::configuration("Limit must be greater than 0"));
        }

        if window == 0 {
            return Err(RateLimitError::configuration("Window must be greater than 0"));
        }

        Ok(())
    }

    /// Validates token bucket parameters
    pub fn validate_bucket(max_tokens: u64, refill_rate: u64, interval: u64) -> Result<()> {
        if max_tokens == 0 {
            return Err(RateLimitError::configuration("Max tokens must be greater than 0"));
        }

        if refill_rate == 0 {
            return Err(RateLimitError::configuration("Refill rate must be greater than 0"));
        }

        if interval == 0 {
            return Err(RateLimitError::configuration("Interval must be greater than 0"));
        }

        Ok(())
    }
}

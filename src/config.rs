use crate::algorithms::{Algorithm, AlgorithmKind};
use crate::config_validator::ConfigValidator;
use crate::error::{RateLimitError, Result};
use crate::limiter::Limiter;
use crate::units::TimeUnit;
use envconfig::Envconfig;

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Redis connection URL
    #[envconfig(from = "REDIS_URL", default = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Namespace for every key the limiter writes
    #[envconfig(from = "RATELIMIT_PREFIX", default = "ratelimit")]
    pub prefix: String,

    /// fixed_window, sliding_window or token_bucket
    #[envconfig(from = "RATELIMIT_ALGORITHM", default = "sliding_window")]
    pub algorithm: AlgorithmKind,

    /// Unit of the window and of the refill interval
    #[envconfig(from = "RATELIMIT_UNIT", default = "s")]
    pub unit: TimeUnit,

    /// Requests allowed per window
    #[envconfig(from = "RATELIMIT_LIMIT", default = "10")]
    pub limit: u64,

    #[envconfig(from = "RATELIMIT_WINDOW", default = "10")]
    pub window: u64,

    /// Token bucket capacity
    #[envconfig(from = "RATELIMIT_MAX_TOKENS", default = "10")]
    pub max_tokens: u64,

    /// Tokens added per interval
    #[envconfig(from = "RATELIMIT_REFILL_RATE", default = "5")]
    pub refill_rate: u64,

    #[envconfig(from = "RATELIMIT_INTERVAL", default = "1")]
    pub interval: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Config::init_from_env()
            .map_err(|e| RateLimitError::configuration(format!("Failed to load configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ConfigValidator::validate_redis_url(&self.redis_url)?;
        ConfigValidator::validate_prefix(&self.prefix)?;

        match self.algorithm {
            AlgorithmKind::FixedWindow | AlgorithmKind::SlidingWindow => {
                ConfigValidator::validate_window(self.limit, self.window)
            }
            AlgorithmKind::TokenBucket => {
                ConfigValidator::validate_bucket(self.max_tokens, self.refill_rate, self.interval)
            }
        }
    }

    pub fn limiter(&self) -> Limiter {
        Limiter::new(self.prefix.clone())
    }

    /// Build the configured algorithm
    pub fn algorithm(&self) -> Result<Algorithm> {
        let limiter = self.limiter();
        match self.algorithm {
            AlgorithmKind::FixedWindow => limiter.fixed_window(self.limit, self.window, self.unit),
            AlgorithmKind::SlidingWindow => limiter.sliding_window(self.limit, self.window, self.unit),
            AlgorithmKind::TokenBucket => {
                limiter.token_bucket(self.max_tokens, self.refill_rate, self.interval, self.unit)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> std::result::Result<Config, envconfig::Error> {
        let hashmap: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::init_from_hashmap(&hashmap)
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.prefix, "ratelimit");
        assert_eq!(config.algorithm, AlgorithmKind::SlidingWindow);
        assert_eq!(config.unit, TimeUnit::Seconds);
        assert!(config.validate().is_ok());

        let algorithm = config.algorithm().unwrap();
        assert_eq!(algorithm.kind(), AlgorithmKind::SlidingWindow);
        assert_eq!(algorithm.limit(), 10);
    }

    #[test]
    fn test_token_bucket_from_vars() {
        let config = config_from(&[
            ("RATELIMIT_ALGORITHM", "token_bucket"),
            ("RATELIMIT_MAX_TOKENS", "100"),
            ("RATELIMIT_REFILL_RATE", "10"),
            ("RATELIMIT_INTERVAL", "500"),
            ("RATELIMIT_UNIT", "ms"),
        ])
        .unwrap();

        let algorithm = config.algorithm().unwrap();
        assert_eq!(algorithm.kind(), AlgorithmKind::TokenBucket);
        assert_eq!(algorithm.limit(), 100);
    }

    #[test]
    fn test_invalid_values() {
        assert!(config_from(&[("RATELIMIT_UNIT", "weeks")]).is_err());
        assert!(config_from(&[("RATELIMIT_ALGORITHM", "leaky_bucket")]).is_err());

        let config = config_from(&[("RATELIMIT_LIMIT", "0")]).unwrap();
        assert!(config.validate().is_err());
        assert!(config.algorithm().is_err());

        let config = config_from(&[("REDIS_URL", "http://localhost:6379")]).unwrap();
        assert!(config.validate().is_err());
    }
}

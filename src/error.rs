use thiserror::Error;

#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Rejected limiter parameters. Only raised while constructing a limiter.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Rejected call arguments. Raised before the store is touched.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Store(#[from] redis::RedisError),

    #[error("Unexpected reply from store: {0}")]
    UnexpectedReply(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RateLimitError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        RateLimitError::Configuration(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        RateLimitError::InvalidArgument(msg.into())
    }

    pub fn unexpected_reply(msg: impl Into<String>) -> Self {
        RateLimitError::UnexpectedReply(msg.into())
    }

    /// True for failures that originate in the store or its transport.
    pub fn is_store_error(&self) -> bool {
        matches!(self, RateLimitError::Store(_) | RateLimitError::UnexpectedReply(_))
    }
}

pub type Result<T> = std::result::Result<T, RateLimitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = RateLimitError::configuration("window must be greater than 0");
        assert_eq!(err.to_string(), "Configuration error: window must be greater than 0");

        let err = RateLimitError::invalid_argument("timeout must be greater than 0");
        assert_eq!(err.to_string(), "Invalid argument: timeout must be greater than 0");
    }

    #[test]
    fn test_redis_error_is_transparent() {
        let redis_err = redis::RedisError::from((redis::ErrorKind::IoError, "connection refused"));
        let expected = redis_err.to_string();

        let err: RateLimitError = redis_err.into();
        assert!(err.is_store_error());
        assert_eq!(err.to_string(), expected);
    }

    #[test]
    fn test_argument_errors_are_not_store_errors() {
        assert!(!RateLimitError::invalid_argument("cost").is_store_error());
        assert!(!RateLimitError::configuration("unit").is_store_error());
    }
}

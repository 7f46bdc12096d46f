use serde::Serialize;

/// Outcome of a single rate limit decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Response {
    /// Whether the request may pass.
    pub allowed: bool,
    /// The limit configured on the algorithm (requests per window or max tokens).
    pub limit: u64,
    /// Further requests permitted in the current state. Never negative.
    pub remaining: u64,
    /// Unix time in milliseconds at which capacity becomes available again.
    pub reset: u64,
}

impl Response {
    pub fn allowed(limit: u64, remaining: u64, reset: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: remaining.min(limit),
            reset,
        }
    }

    pub fn denied(limit: u64, remaining: u64, reset: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: remaining.min(limit),
            reset,
        }
    }

    /// Milliseconds a denied caller should wait before retrying.
    pub fn retry_after(&self, now_millis: u64) -> u64 {
        if self.allowed {
            0
        } else {
            self.reset.saturating_sub(now_millis)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_is_capped_at_limit() {
        let response = Response::allowed(5, 9, 1_000);
        assert_eq!(response.remaining, 5);
    }

    #[test]
    fn test_retry_after() {
        assert_eq!(Response::allowed(5, 4, 1_000).retry_after(400), 0);
        assert_eq!(Response::denied(5, 0, 1_000).retry_after(400), 600);
        assert_eq!(Response::denied(5, 0, 1_000).retry_after(1_500), 0);
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_value(Response::denied(10, 0, 42)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "allowed": false, "limit": 10, "remaining": 0, "reset": 42 })
        );
    }
}

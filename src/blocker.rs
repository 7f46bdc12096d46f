//! Blocking-wait coordinator.
//!
//! Retries a denied decision until it is allowed or a deadline passes. The
//! sleep between retries is derived from the `reset` hint of the last
//! response, capped at the deadline. The coordinator keeps no state outside
//! one invocation, so any number of callers may use it concurrently.

use crate::clock::Clock;
use crate::error::{RateLimitError, Result};
use crate::response::Response;
use crate::sleeper::{BlockingSleeper, Sleeper};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Rejects a zero timeout; returns the timeout in whole milliseconds (at least 1).
pub fn validate_timeout(timeout: Duration) -> Result<u64> {
    if timeout.is_zero() {
        return Err(RateLimitError::invalid_argument("Timeout must be greater than 0"));
    }
    Ok(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1))
}

/// How long to sleep before retrying: until `reset` or the deadline,
/// whichever comes first, never negative.
pub fn next_sleep(response: &Response, deadline: u64, now: u64) -> Duration {
    Duration::from_millis(response.reset.min(deadline).saturating_sub(now))
}

fn should_retry(response: &Response, deadline: u64, now: u64) -> bool {
    !response.allowed && now < deadline
}

/// Async variant: suspends the task between retries.
pub async fn block_until_ready<F, Fut>(
    clock: &dyn Clock,
    sleeper: &dyn Sleeper,
    timeout: Duration,
    mut decide: F,
) -> Result<Response>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Response>>,
{
    let timeout = validate_timeout(timeout)?;

    let mut response = decide().await?;
    if response.allowed {
        return Ok(response);
    }

    let deadline = clock.now_millis().saturating_add(timeout);

    while should_retry(&response, deadline, clock.now_millis()) {
        let wait = next_sleep(&response, deadline, clock.now_millis());
        debug!(wait_ms = wait.as_millis() as u64, reset = response.reset, "Waiting for capacity");

        sleeper.sleep(wait).await;
        response = decide().await?;
    }

    if !response.allowed {
        warn!(deadline, reset = response.reset, "Gave up waiting for capacity");
    }
    Ok(response)
}

/// Blocking variant: parks the thread between retries.
pub fn block_until_ready_blocking<F>(
    clock: &dyn Clock,
    sleeper: &dyn BlockingSleeper,
    timeout: Duration,
    mut decide: F,
) -> Result<Response>
where
    F: FnMut() -> Result<Response>,
{
    let timeout = validate_timeout(timeout)?;

    let mut response = decide()?;
    if response.allowed {
        return Ok(response);
    }

    let deadline = clock.now_millis().saturating_add(timeout);

    while should_retry(&response, deadline, clock.now_millis()) {
        let wait = next_sleep(&response, deadline, clock.now_millis());
        debug!(wait_ms = wait.as_millis() as u64, reset = response.reset, "Waiting for capacity");

        sleeper.sleep(wait);
        response = decide()?;
    }

    if !response.allowed {
        warn!(deadline, reset = response.reset, "Gave up waiting for capacity");
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::cell::Cell;

    #[test]
    fn test_validate_timeout() {
        assert!(matches!(
            validate_timeout(Duration::ZERO),
            Err(RateLimitError::InvalidArgument(_))
        ));
        assert_eq!(validate_timeout(Duration::from_micros(10)).unwrap(), 1);
        assert_eq!(validate_timeout(Duration::from_secs(2)).unwrap(), 2_000);
    }

    #[test]
    fn test_next_sleep_is_clamped() {
        let response = Response::denied(1, 0, 5_000);
        assert_eq!(next_sleep(&response, 10_000, 1_000), Duration::from_millis(4_000));
        assert_eq!(next_sleep(&response, 3_000, 1_000), Duration::from_millis(2_000));
        assert_eq!(next_sleep(&response, 10_000, 6_000), Duration::ZERO);
    }

    #[test]
    fn test_zero_timeout_never_decides() {
        let clock = ManualClock::new(0);
        let calls = Cell::new(0);

        let result = block_until_ready_blocking(&clock, &clock, Duration::ZERO, || {
            calls.set(calls.get() + 1);
            Ok(Response::allowed(1, 0, 0))
        });

        assert!(matches!(result, Err(RateLimitError::InvalidArgument(_))));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_blocking_waits_until_reset() {
        let clock = ManualClock::new(1_000);
        let calls = Cell::new(0);

        // Denied until t=4000.
        let response = block_until_ready_blocking(&clock, &clock, Duration::from_secs(10), || {
            calls.set(calls.get() + 1);
            if clock.now_millis() >= 4_000 {
                Ok(Response::allowed(1, 0, 14_000))
            } else {
                Ok(Response::denied(1, 0, 4_000))
            }
        })
        .unwrap();

        assert!(response.allowed);
        assert_eq!(calls.get(), 2);
        assert_eq!(clock.now_millis(), 4_000);
    }

    #[test]
    fn test_blocking_gives_up_at_deadline() {
        let clock = ManualClock::new(0);

        let response = block_until_ready_blocking(&clock, &clock, Duration::from_millis(500), || {
            Ok(Response::denied(1, 0, 60_000))
        })
        .unwrap();

        assert!(!response.allowed);
        assert_eq!(clock.now_millis(), 500);
    }

    #[test]
    fn test_errors_propagate() {
        let clock = ManualClock::new(0);
        let calls = Cell::new(0);

        let result = block_until_ready_blocking(&clock, &clock, Duration::from_secs(1), || {
            calls.set(calls.get() + 1);
            if calls.get() == 1 {
                Ok(Response::denied(1, 0, 100))
            } else {
                Err(RateLimitError::unexpected_reply("boom"))
            }
        });

        assert!(matches!(result, Err(RateLimitError::UnexpectedReply(_))));
    }

    #[test]
    fn test_async_returns_first_allowed_response() {
        let clock = ManualClock::new(0);
        let mut calls = 0;

        let response = tokio_test::block_on(block_until_ready(&clock, &clock, Duration::from_secs(5), || {
            calls += 1;
            let response = if calls < 3 {
                Response::denied(1, 0, clock.now_millis() + 1_000)
            } else {
                Response::allowed(1, 0, clock.now_millis() + 1_000)
            };
            async move { Ok(response) }
        }))
        .unwrap();

        assert!(response.allowed);
        assert_eq!(calls, 3);
        assert_eq!(clock.now_millis(), 2_000);
    }
}

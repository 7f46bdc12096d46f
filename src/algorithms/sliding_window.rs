//! Sliding window rate limiting algorithm
//!
//! Approximates a continuous window with two adjacent fixed windows. The
//! previous window's count is weighted by how much of it still overlaps the
//! sliding window, which decays linearly as time moves through the current
//! window. Denied requests never touch the counters.

use super::queries::{COUNT_EXISTING, READ_COUNTERS};
use super::{clamp_remaining, positive, positive_millis};
use crate::error::Result;
use crate::response::Response;
use crate::script::{Commands, Reply, Script, ScriptCall};
use crate::units::TimeUnit;

/// Counter keys stay readable for one extra window, plus this margin.
const EXPIRY_MARGIN_MS: i64 = 1_000;

fn weighted_previous(requests_in_previous_window: i64, now: i64, window: i64) -> f64 {
    let percentage_in_current_window = (now % window) as f64 / window as f64;
    requests_in_previous_window as f64 * (1.0 - percentage_in_current_window)
}

fn weighted_increment(commands: &mut dyn Commands, keys: &[String], args: &[i64]) -> Result<Reply> {
    let (max_requests, now, window, cost) = (args[0], args[1], args[2], args[3]);

    let requests_in_current_window = commands.get(&keys[0])?.unwrap_or(0);
    let requests_in_previous_window = commands.get(&keys[1])?.unwrap_or(0);

    let weighted = weighted_previous(requests_in_previous_window, now, window);
    let estimated = weighted + requests_in_current_window as f64;

    if estimated + (cost - 1) as f64 >= max_requests as f64 {
        return Ok(Reply::pair(0, 0));
    }

    let new_current_requests = commands.incr_by(&keys[0], cost)?;
    if new_current_requests == cost {
        commands.pexpire(&keys[0], window.saturating_mul(2).saturating_add(EXPIRY_MARGIN_MS));
    }

    let remaining = (max_requests as f64 - (new_current_requests as f64 + weighted)).floor();
    Ok(Reply::pair(1, remaining as i64))
}

pub static SCRIPT: Script = Script {
    name: "sliding_window",
    lua: r#"
    local current_key  = KEYS[1]              -- prefix:identifier:current_window
    local previous_key = KEYS[2]              -- prefix:identifier:previous_window
    local max_requests = tonumber(ARGV[1])    -- max number of requests per window
    local now          = tonumber(ARGV[2])    -- current timestamp in milliseconds
    local window       = tonumber(ARGV[3])    -- window length in milliseconds
    local cost         = tonumber(ARGV[4])    -- how much this request counts

    local requests_in_current_window  = tonumber(redis.call("GET", current_key) or "0")
    local requests_in_previous_window = tonumber(redis.call("GET", previous_key) or "0")

    local percentage_in_current_window = (now % window) / window
    local weighted_previous = requests_in_previous_window * (1 - percentage_in_current_window)
    local estimated = weighted_previous + requests_in_current_window

    if estimated + (cost - 1) >= max_requests then
      return {0, 0}
    end

    local new_current_requests = redis.call("INCRBY", current_key, cost)
    if new_current_requests == cost then
      -- Keep the window readable while it is the previous window of the next one.
      redis.call("PEXPIRE", current_key, window * 2 + 1000)
    end

    return {1, math.floor(max_requests - (new_current_requests + weighted_previous))}
    "#,
    native: weighted_increment,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlidingWindow {
    prefix: String,
    max_requests: u64,
    window: u64,
}

impl SlidingWindow {
    pub fn new(prefix: impl Into<String>, max_requests: u64, window: u64, unit: TimeUnit) -> Result<Self> {
        Ok(Self {
            prefix: prefix.into(),
            max_requests: positive("max_requests", max_requests)?,
            window: positive_millis("window", window, unit)?,
        })
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    pub fn window_millis(&self) -> u64 {
        self.window
    }

    fn current_window(&self, now: u64) -> i64 {
        (now / self.window) as i64
    }

    /// Keys of the current and the previous window, in that order.
    fn keys(&self, identifier: &str, now: u64) -> Vec<String> {
        let current_window = self.current_window(now);
        vec![
            format!("{}:{}:{}", self.prefix, identifier, current_window),
            format!("{}:{}:{}", self.prefix, identifier, current_window - 1),
        ]
    }

    fn window_end(&self, now: u64) -> u64 {
        (now / self.window + 1) * self.window
    }

    pub fn limit_call(&self, identifier: &str, now: u64, cost: i64) -> ScriptCall {
        ScriptCall::new(
            &SCRIPT,
            self.keys(identifier, now),
            vec![self.max_requests as i64, now as i64, self.window as i64, cost],
        )
    }

    /// `reply` is `{allowed, remaining}`.
    pub fn limit_response(&self, reply: Reply, now: u64) -> Result<Response> {
        let [allowed, remaining] = reply.into_array::<2>()?;
        let remaining = clamp_remaining(remaining.as_int()?, self.max_requests);
        let reset = self.window_end(now);

        if allowed.as_int()? == 1 {
            Ok(Response::allowed(self.max_requests, remaining, reset))
        } else {
            Ok(Response::denied(self.max_requests, remaining, reset))
        }
    }

    pub fn remaining_call(&self, identifier: &str, now: u64) -> ScriptCall {
        ScriptCall::new(&READ_COUNTERS, self.keys(identifier, now), vec![])
    }

    /// Cheap read-only estimate. It uses its own formula and may differ
    /// slightly from what the decision script would compute at the same time.
    pub fn remaining_from(&self, reply: Reply, now: u64) -> Result<u64> {
        let [current, previous] = reply.into_array::<2>()?;
        let requests_in_current_window = current.as_optional_int()?.unwrap_or(0);
        let requests_in_previous_window = previous.as_optional_int()?.unwrap_or(0);

        let estimated = weighted_previous(requests_in_previous_window, now as i64, self.window as i64)
            + requests_in_current_window as f64;

        if estimated >= self.max_requests as f64 {
            return Ok(0);
        }

        Ok(clamp_remaining(
            self.max_requests as i64 - requests_in_current_window,
            self.max_requests,
        ))
    }

    pub fn reset_call(&self, identifier: &str, now: u64) -> ScriptCall {
        ScriptCall::new(&COUNT_EXISTING, self.keys(identifier, now), vec![])
    }

    pub fn reset_from(&self, reply: Reply, now: u64) -> Result<Option<u64>> {
        if reply.as_int()? == 0 {
            return Ok(None);
        }
        Ok(Some(self.window_end(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> SlidingWindow {
        SlidingWindow::new("ratelimit", 10, 1, TimeUnit::Seconds).unwrap()
    }

    #[test]
    fn test_keys_cover_current_and_previous_window() {
        let call = limiter().limit_call("user", 5_250, 1);
        assert_eq!(
            call.keys,
            vec!["ratelimit:user:5".to_string(), "ratelimit:user:4".to_string()]
        );
        assert_eq!(call.args, vec![10, 5_250, 1_000, 1]);
    }

    #[test]
    fn test_previous_weight_decays_linearly() {
        assert_eq!(weighted_previous(10, 5_000, 1_000), 10.0);
        assert_eq!(weighted_previous(10, 5_250, 1_000), 7.5);
        assert_eq!(weighted_previous(10, 5_999, 1_000), 10.0 * (1.0 - 0.999));
    }

    #[test]
    fn test_limit_response() {
        let limiter = limiter();

        let response = limiter.limit_response(Reply::pair(1, 4), 5_250).unwrap();
        assert_eq!(response, Response::allowed(10, 4, 6_000));

        // Allowed with a fractional estimate can floor below zero.
        let response = limiter.limit_response(Reply::pair(1, -1), 5_250).unwrap();
        assert_eq!(response, Response::allowed(10, 0, 6_000));

        let response = limiter.limit_response(Reply::pair(0, 0), 5_250).unwrap();
        assert_eq!(response, Response::denied(10, 0, 6_000));
    }

    #[test]
    fn test_remaining_estimate() {
        let limiter = limiter();

        // 4 in the current window, 10 in the previous one at 25% into the window.
        let reply = Reply::Array(vec![Reply::Int(4), Reply::Int(10)]);
        assert_eq!(limiter.remaining_from(reply, 5_250).unwrap(), 0);

        // 4 in the current window, 4 in the previous one: estimate 7.
        let reply = Reply::Array(vec![Reply::Int(4), Reply::Int(4)]);
        assert_eq!(limiter.remaining_from(reply, 5_250).unwrap(), 6);

        let reply = Reply::Array(vec![Reply::Nil, Reply::Nil]);
        assert_eq!(limiter.remaining_from(reply, 5_250).unwrap(), 10);
    }

    #[test]
    fn test_reset() {
        let limiter = limiter();
        assert_eq!(limiter.reset_from(Reply::Int(0), 5_250).unwrap(), None);
        assert_eq!(limiter.reset_from(Reply::Int(2), 5_250).unwrap(), Some(6_000));
    }

    #[test]
    fn test_huge_window_expiry_saturates() {
        use crate::script::BlockingScriptStore;
        use crate::store::MemoryStore;

        let limiter = SlidingWindow::new("ratelimit", 2, i64::MAX as u64, TimeUnit::Milliseconds).unwrap();
        let store = MemoryStore::new();

        let reply = store.eval(&limiter.limit_call("user", 5_000, 1)).unwrap();
        assert_eq!(limiter.limit_response(reply, 5_000).unwrap().remaining, 1);
        assert!(store.ttl_millis("ratelimit:user:0").unwrap().is_some());
    }
}

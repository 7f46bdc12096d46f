//! Fixed window rate limiting algorithm
//!
//! Time is divided into windows of fixed length and each window has a maximum
//! number of allowed requests. Every window has its own counter key, which
//! expires on its own once the window is over.

use super::queries::{COUNT_EXISTING, READ_COUNTERS};
use super::{clamp_remaining, positive, positive_millis};
use crate::error::Result;
use crate::response::Response;
use crate::script::{Commands, Reply, Script, ScriptCall};
use crate::units::TimeUnit;

fn increment(commands: &mut dyn Commands, keys: &[String], args: &[i64]) -> Result<Reply> {
    let (window, cost) = (args[0], args[1]);

    let current_requests = commands.incr_by(&keys[0], cost)?;
    if current_requests == cost {
        commands.pexpire(&keys[0], window);
    }

    Ok(Reply::Int(current_requests))
}

pub static SCRIPT: Script = Script {
    name: "fixed_window",
    lua: r#"
    local key    = KEYS[1]              -- prefix:identifier:window
    local window = tonumber(ARGV[1])    -- window length in milliseconds
    local cost   = tonumber(ARGV[2])    -- how much this request counts

    local current_requests = redis.call("INCRBY", key, cost)
    if current_requests == cost then
      -- First request of the window: the key lives as long as the window.
      redis.call("PEXPIRE", key, window)
    end

    return current_requests
    "#,
    native: increment,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedWindow {
    prefix: String,
    max_requests: u64,
    window: u64,
}

impl FixedWindow {
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

    fn current_window(&self, now: u64) -> u64 {
        now / self.window
    }

    fn key(&self, identifier: &str, window: u64) -> String {
        format!("{}:{}:{}", self.prefix, identifier, window)
    }

    fn window_end(&self, now: u64) -> u64 {
        (self.current_window(now) + 1) * self.window
    }

    pub fn limit_call(&self, identifier: &str, now: u64, cost: i64) -> ScriptCall {
        let key = self.key(identifier, self.current_window(now));
        ScriptCall::new(&SCRIPT, vec![key], vec![self.window as i64, cost])
    }

    /// `reply` is the counter after the increment.
    pub fn limit_response(&self, reply: Reply, now: u64) -> Result<Response> {
        let current_requests = reply.as_int()?;
        let remaining = clamp_remaining(self.max_requests as i64 - current_requests, self.max_requests);
        let reset = self.window_end(now);

        if current_requests <= self.max_requests as i64 {
            Ok(Response::allowed(self.max_requests, remaining, reset))
        } else {
            Ok(Response::denied(self.max_requests, remaining, reset))
        }
    }

    pub fn remaining_call(&self, identifier: &str, now: u64) -> ScriptCall {
        let key = self.key(identifier, self.current_window(now));
        ScriptCall::new(&READ_COUNTERS, vec![key], vec![])
    }

    pub fn remaining_from(&self, reply: Reply) -> Result<u64> {
        let [current] = reply.into_array::<1>()?;
        match current.as_optional_int()? {
            None => Ok(self.max_requests),
            Some(current_requests) => Ok(clamp_remaining(
                self.max_requests as i64 - current_requests,
                self.max_requests,
            )),
        }
    }

    pub fn reset_call(&self, identifier: &str, now: u64) -> ScriptCall {
        let key = self.key(identifier, self.current_window(now));
        ScriptCall::new(&COUNT_EXISTING, vec![key], vec![])
    }

    pub fn reset_from(&self, reply: Reply, now: u64) -> Result<Option<u64>> {
        if reply.as_int()? == 0 {
            return Ok(None);
        }
        Ok(Some(self.window_end(now)))
    }
}

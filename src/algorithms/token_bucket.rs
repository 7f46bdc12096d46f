//! Token bucket rate limiting algorithm
//!
//! A bucket holds up to `max_tokens` tokens and receives `refill_rate` tokens
//! every `interval`. Each request takes `cost` tokens; an empty bucket denies.
//! Refills advance `updated_at` in whole intervals, never to "now", so the
//! refill cadence does not drift with request arrival times.

use super::queries::READ_BUCKET;
use super::{clamp_remaining, positive, positive_millis};
use crate::error::Result;
use crate::response::Response;
use crate::script::{Commands, Reply, Script, ScriptCall};
use crate::units::TimeUnit;

/// Tokens after `refills` refills, capped at the capacity.
fn refilled(tokens: i64, refills: i64, refill_rate: i64, max_tokens: i64) -> i64 {
    max_tokens.min(tokens.max(0).saturating_add(refills.saturating_mul(refill_rate)))
}

/// Refills needed to get from `tokens` back to the capacity, rounded up.
fn refills_to_full(tokens: i64, refill_rate: i64, max_tokens: i64) -> i64 {
    let deficit = max_tokens.saturating_sub(tokens.max(0));
    deficit / refill_rate + i64::from(deficit % refill_rate != 0)
}

fn refill_and_take(commands: &mut dyn Commands, keys: &[String], args: &[i64]) -> Result<Reply> {
    let (max_tokens, interval, refill_rate, now, cost) = (args[0], args[1], args[2], args[3], args[4]);
    let key = &keys[0];

    let bucket = commands.hmget(key, &["updated_at", "tokens"])?;
    let (mut updated_at, mut tokens) = match bucket[0] {
        None => (now, max_tokens),
        Some(updated_at) => (updated_at, bucket[1].unwrap_or(0)),
    };

    if now >= updated_at.saturating_add(interval) {
        let refills = (now - updated_at) / interval;
        tokens = refilled(tokens, refills, refill_rate, max_tokens);
        updated_at += refills * interval;
    }

    let next_refill = updated_at.saturating_add(interval);
    let remaining = tokens.saturating_sub(cost);
    if remaining >= 0 {
        tokens = remaining;
    }

    commands.hset(key, &[("updated_at", updated_at), ("tokens", tokens)])?;

    let ttl = refills_to_full(tokens, refill_rate, max_tokens)
        .saturating_add(1)
        .saturating_mul(interval)
        .saturating_add(updated_at - now);
    commands.pexpire(key, ttl);

    Ok(Reply::pair(remaining, next_refill))
}

pub static SCRIPT: Script = Script {
    name: "token_bucket",
    lua: r#"
    local key         = KEYS[1]              -- prefix:identifier
    local max_tokens  = tonumber(ARGV[1])    -- bucket capacity
    local interval    = tonumber(ARGV[2])    -- milliseconds between refills
    local refill_rate = tonumber(ARGV[3])    -- tokens added per refill
    local now         = tonumber(ARGV[4])    -- current timestamp in milliseconds
    local cost        = tonumber(ARGV[5])    -- tokens this request takes

    local bucket = redis.call("HMGET", key, "updated_at", "tokens")

    local updated_at = now
    local tokens     = max_tokens
    if bucket[1] then
      updated_at = tonumber(bucket[1])
      tokens     = tonumber(bucket[2]) or 0
    end

    if now >= updated_at + interval then
      local refills = math.floor((now - updated_at) / interval)
      tokens     = math.min(max_tokens, math.max(tokens, 0) + refills * refill_rate)
      updated_at = updated_at + refills * interval
    end

    local next_refill = updated_at + interval
    local remaining   = tokens - cost
    if remaining >= 0 then
      tokens = remaining
    end

    redis.call("HSET", key, "updated_at", updated_at, "tokens", tokens)

    -- Expire once the bucket would be full again, plus one interval.
    local refills_to_full = math.ceil((max_tokens - tokens) / refill_rate)
    redis.call("PEXPIRE", key, updated_at + (refills_to_full + 1) * interval - now)

    return {remaining, next_refill}
    "#,
    native: refill_and_take,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBucket {
    prefix: String,
    max_tokens: u64,
    refill_rate: u64,
    interval: u64,
}

impl TokenBucket {
    pub fn new(
        prefix: impl Into<String>,
        max_tokens: u64,
        refill_rate: u64,
        interval: u64,
        unit: TimeUnit,
    ) -> Result<Self> {
        Ok(Self {
            prefix: prefix.into(),
            max_tokens: positive("max_tokens", max_tokens)?,
            refill_rate: positive("refill_rate", refill_rate)?,
            interval: positive_millis("interval", interval, unit)?,
        })
    }

    pub fn max_tokens(&self) -> u64 {
        self.max_tokens
    }

    pub fn refill_rate(&self) -> u64 {
        self.refill_rate
    }

    pub fn interval_millis(&self) -> u64 {
        self.interval
    }

    fn key(&self, identifier: &str) -> String {
        format!("{}:{}", self.prefix, identifier)
    }

    /// Whole intervals elapsed since `updated_at`.
    fn refills_since(&self, updated_at: i64, now: u64) -> i64 {
        (now as i64 - updated_at).max(0) / self.interval as i64
    }

    pub fn limit_call(&self, identifier: &str, now: u64, cost: i64) -> ScriptCall {
        ScriptCall::new(
            &SCRIPT,
            vec![self.key(identifier)],
            vec![
                self.max_tokens as i64,
                self.interval as i64,
                self.refill_rate as i64,
                now as i64,
                cost,
            ],
        )
    }

    /// `reply` is `{remaining, next_refill}`; a negative remaining means denied.
    pub fn limit_response(&self, reply: Reply) -> Result<Response> {
        let [remaining, next_refill] = reply.into_array::<2>()?;
        let remaining = remaining.as_int()?;
        let reset = next_refill.as_int()?.max(0) as u64;

        if remaining >= 0 {
            Ok(Response::allowed(self.max_tokens, remaining as u64, reset))
        } else {
            Ok(Response::denied(self.max_tokens, 0, reset))
        }
    }

    pub fn remaining_call(&self, identifier: &str) -> ScriptCall {
        ScriptCall::new(&READ_BUCKET, vec![self.key(identifier)], vec![])
    }

    pub fn remaining_from(&self, reply: Reply, now: u64) -> Result<u64> {
        let [updated_at, tokens] = reply.into_array::<2>()?;
        let Some(updated_at) = updated_at.as_optional_int()? else {
            return Ok(self.max_tokens);
        };
        let tokens = tokens.as_optional_int()?.unwrap_or(0);

        let refills = self.refills_since(updated_at, now);
        let available = if refills == 0 {
            tokens
        } else {
            refilled(tokens, refills, self.refill_rate as i64, self.max_tokens as i64)
        };

        Ok(clamp_remaining(available, self.max_tokens))
    }

    pub fn reset_call(&self, identifier: &str) -> ScriptCall {
        self.remaining_call(identifier)
    }

    /// Next refill instant, `None` when the identifier has no bucket.
    pub fn reset_from(&self, reply: Reply, now: u64) -> Result<Option<u64>> {
        let [updated_at, _] = reply.into_array::<2>()?;
        let Some(updated_at) = updated_at.as_optional_int()? else {
            return Ok(None);
        };

        let last_refill = updated_at + self.refills_since(updated_at, now) * self.interval as i64;
        Ok(Some(last_refill.saturating_add(self.interval as i64).max(0) as u64))
    }
}

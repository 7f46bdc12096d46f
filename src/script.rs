//! Atomic script contract between the algorithms and the store.
//!
//! Every decision is one script call: the store runs "read state, compute,
//! write state, return decision inputs" as a single indivisible operation.
//! Redis receives the Lua body through `EVAL`; the in-process store runs the
//! equivalent native body under its keyspace lock.

use crate::error::{RateLimitError, Result};
use async_trait::async_trait;
use redis::{ErrorKind, FromRedisValue, RedisResult, Value};
use std::fmt;

/// Keyspace operations a native script body may perform.
///
/// Mirrors the handful of Redis commands the Lua bodies use. Missing keys
/// read as `None`; numeric values are stored as integers.
pub trait Commands {
    fn get(&mut self, key: &str) -> Result<Option<i64>>;

    /// `INCRBY`: adds `by` to the counter at `key`, creating it at 0 first.
    fn incr_by(&mut self, key: &str, by: i64) -> Result<i64>;

    /// `PEXPIRE`: the key disappears `ttl_millis` from now.
    fn pexpire(&mut self, key: &str, ttl_millis: i64);

    /// `EXISTS`: how many of `keys` exist.
    fn exists(&mut self, keys: &[String]) -> i64;

    fn hmget(&mut self, key: &str, fields: &[&str]) -> Result<Vec<Option<i64>>>;

    fn hset(&mut self, key: &str, fields: &[(&str, i64)]) -> Result<()>;
}

pub type NativeScript = fn(&mut dyn Commands, &[String], &[i64]) -> Result<Reply>;

/// A content-stable script, identified by name.
pub struct Script {
    pub name: &'static str,
    pub lua: &'static str,
    pub(crate) native: NativeScript,
}

impl Script {
    /// Runs the native body against an in-process keyspace.
    pub fn run_native(&self, commands: &mut dyn Commands, keys: &[String], args: &[i64]) -> Result<Reply> {
        (self.native)(commands, keys, args)
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script").field("name", &self.name).finish()
    }
}

/// One invocation of a script: ordered keys and ordered integer arguments.
#[derive(Debug, Clone)]
pub struct ScriptCall {
    pub script: &'static Script,
    pub keys: Vec<String>,
    pub args: Vec<i64>,
}

impl ScriptCall {
    pub fn new(script: &'static Script, keys: Vec<String>, args: Vec<i64>) -> Self {
        Self { script, keys, args }
    }
}

/// Typed result of a script call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Int(i64),
    Array(Vec<Reply>),
}

impl Reply {
    pub fn pair(first: i64, second: i64) -> Self {
        Reply::Array(vec![Reply::Int(first), Reply::Int(second)])
    }

    pub fn optional(value: Option<i64>) -> Self {
        value.map(Reply::Int).unwrap_or(Reply::Nil)
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Reply::Int(value) => Ok(*value),
            other => Err(RateLimitError::unexpected_reply(format!(
                "expected an integer, got {:?}",
                other
            ))),
        }
    }

    pub fn as_optional_int(&self) -> Result<Option<i64>> {
        match self {
            Reply::Nil => Ok(None),
            Reply::Int(value) => Ok(Some(*value)),
            other => Err(RateLimitError::unexpected_reply(format!(
                "expected an integer or nil, got {:?}",
                other
            ))),
        }
    }

    /// Unpacks an array reply of exactly `N` elements.
    pub fn into_array<const N: usize>(self) -> Result<[Reply; N]> {
        match self {
            Reply::Array(items) => {
                let len = items.len();
                items.try_into().map_err(|_| {
                    RateLimitError::unexpected_reply(format!(
                        "expected {} elements, got {}",
                        N, len
                    ))
                })
            }
            other => Err(RateLimitError::unexpected_reply(format!(
                "expected an array, got {:?}",
                other
            ))),
        }
    }
}

impl FromRedisValue for Reply {
    fn from_redis_value(v: &Value) -> RedisResult<Self> {
        match v {
            Value::Nil => Ok(Reply::Nil),
            Value::Int(value) => Ok(Reply::Int(*value)),
            Value::Data(bytes) => parse_integer(bytes),
            Value::Status(status) => parse_integer(status.as_bytes()),
            Value::Bulk(items) => items
                .iter()
                .map(Reply::from_redis_value)
                .collect::<RedisResult<Vec<_>>>()
                .map(Reply::Array),
            #[allow(unreachable_patterns)]
            other => Err(redis::RedisError::from((
                ErrorKind::TypeError,
                "Unsupported script reply",
                format!("{:?}", other),
            ))),
        }
    }
}

fn parse_integer(bytes: &[u8]) -> RedisResult<Reply> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|text| text.trim().parse::<i64>().ok())
        .map(Reply::Int)
        .ok_or_else(|| {
            redis::RedisError::from((
                ErrorKind::TypeError,
                "Script reply is not an integer",
                String::from_utf8_lossy(bytes).into_owned(),
            ))
        })
}

/// Store capable of executing a script atomically, for async callers.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    async fn eval(&self, call: &ScriptCall) -> Result<Reply>;
}

/// Store capable of executing a script atomically, for blocking callers.
pub trait BlockingScriptStore: Send + Sync {
    fn eval(&self, call: &ScriptCall) -> Result<Reply>;
}

#[async_trait]
impl<S: ScriptStore + ?Sized> ScriptStore for std::sync::Arc<S> {
    async fn eval(&self, call: &ScriptCall) -> Result<Reply> {
        (**self).eval(call).await
    }
}

impl<S: BlockingScriptStore + ?Sized> BlockingScriptStore for std::sync::Arc<S> {
    fn eval(&self, call: &ScriptCall) -> Result<Reply> {
        (**self).eval(call)
    }
}

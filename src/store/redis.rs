use crate::error::{RateLimitError, Result};
use crate::script::{BlockingScriptStore, Reply, ScriptCall, ScriptStore};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Cmd, Connection, RedisResult};
use std::sync::{Arc, Mutex};

fn eval_cmd(call: &ScriptCall) -> Cmd {
    let mut cmd = redis::cmd("EVAL");
    cmd.arg(call.script.lua).arg(call.keys.len());

    for key in &call.keys {
        cmd.arg(key);
    }
    for arg in &call.args {
        cmd.arg(*arg);
    }
    cmd
}

/// Async Redis store over a multiplexed connection.
///
/// Cloning is cheap and every clone shares the underlying connection, so one
/// store can serve any number of concurrent tasks.
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        tracing::debug!("Connected to Redis");
        Ok(Self { connection })
    }

    pub fn from_connection(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }

    pub async fn ping(&self) -> Result<String> {
        let mut connection = self.connection.clone();
        let pong: String = redis::cmd("PING").query_async(&mut connection).await?;
        Ok(pong)
    }
}

#[async_trait]
impl ScriptStore for RedisStore {
    async fn eval(&self, call: &ScriptCall) -> Result<Reply> {
        let mut connection = self.connection.clone();
        let result: RedisResult<Reply> = eval_cmd(call).query_async(&mut connection).await;
        result.map_err(|e| {
            tracing::error!(script = call.script.name, error = %e, "Script execution failed");
            RateLimitError::from(e)
        })
    }
}

/// Blocking Redis store over a single lazily opened connection.
pub struct BlockingRedisStore {
    client: Client,
    connection: Arc<Mutex<Option<Connection>>>,
}

impl BlockingRedisStore {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        Ok(Self {
            client,
            connection: Arc::new(Mutex::new(None)),
        })
    }

    pub fn connect(&self) -> Result<()> {
        let conn = self.client.get_connection()?;

        let mut connection_guard = self.lock()?;
        *connection_guard = Some(conn);

        Ok(())
    }

    pub fn ping(&self) -> Result<String> {
        self.with_connection(|conn| redis::cmd("PING").query(conn))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<Connection>>> {
        self.connection
            .lock()
            .map_err(|_| RateLimitError::Internal("Failed to acquire connection lock".into()))
    }

    fn with_connection<T>(&self, f: impl FnOnce(&mut Connection) -> RedisResult<T>) -> Result<T> {
        let mut connection_guard = self.lock()?;

        if connection_guard.is_none() {
            *connection_guard = Some(self.client.get_connection()?);
        }

        let result = match connection_guard.as_mut() {
            Some(conn) => f(conn),
            None => return Err(RateLimitError::Internal("No Redis connection available".into())),
        };

        if let Err(ref e) = result {
            if e.is_io_error() || e.is_connection_dropped() {
                // Reconnect on the next call.
                *connection_guard = None;
            }
        }

        result.map_err(RateLimitError::from)
    }
}

impl BlockingScriptStore for BlockingRedisStore {
    fn eval(&self, call: &ScriptCall) -> Result<Reply> {
        self.with_connection(|conn| eval_cmd(call).query(conn))
            .map_err(|e| {
                tracing::error!(script = call.script.name, error = %e, "Script execution failed");
                e
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{Commands, Script};

    fn noop(_: &mut dyn Commands, _: &[String], _: &[i64]) -> Result<Reply> {
        Ok(Reply::Nil)
    }

    static ECHO: Script = Script {
        name: "echo",
        lua: "return {KEYS[1], ARGV[1]}",
        native: noop,
    };

    #[test]
    fn test_eval_cmd_layout() {
        let call = ScriptCall::new(&ECHO, vec!["ratelimit:a".into(), "ratelimit:b".into()], vec![10, -1]);
        let packed = eval_cmd(&call).get_packed_command();
        let text = String::from_utf8_lossy(&packed);

        let expected = ["EVAL", "return {KEYS[1], ARGV[1]}", "2", "ratelimit:a", "ratelimit:b", "10", "-1"];
        let mut cursor = 0;
        for part in expected {
            let found = text[cursor..].find(part).expect("argument missing or out of order");
            cursor += found + part.len();
        }
    }

    #[test]
    fn test_invalid_url_is_store_error() {
        let err = BlockingRedisStore::new("not a url").err().expect("url must be rejected");
        assert!(err.is_store_error());
    }
}

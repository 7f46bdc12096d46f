//! In-process script store.
//!
//! Holds rate limit state in a local keyspace and executes each script's
//! native body under one lock, which gives the same per-call atomicity Redis
//! gives its Lua scripts. Useful for tests and single-process deployments.

use crate::clock::{Clock, SystemClock};
use crate::error::{RateLimitError, Result};
use crate::script::{BlockingScriptStore, Commands, Reply, ScriptCall, ScriptStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Expired keys are swept from the keyspace at most this often.
const SWEEP_INTERVAL_MS: u64 = 10_000;

#[derive(Debug, Clone)]
enum StoredValue {
    Counter(i64),
    Hash(HashMap<String, i64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: StoredValue,
    expires_at: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
    last_sweep: Arc<AtomicU64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Expiry is evaluated against `clock`; share it with the limiter in tests.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_millis();
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            clock,
            last_sweep: Arc::new(AtomicU64::new(now)),
        }
    }

    /// Drops every expired key and returns how many were removed.
    ///
    /// Runs on its own every few seconds of store activity; window keys are
    /// never read again once their window is over.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now_millis();
        let mut entries = self.lock()?;
        Ok(sweep(&mut entries, now))
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> Result<usize> {
        let now = self.clock.now_millis();
        let entries = self.lock()?;
        Ok(entries.values().filter(|entry| is_live(entry, now)).count())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Remaining time to live of `key` in milliseconds, `None` when the key is
    /// missing or has no expiry.
    pub fn ttl_millis(&self, key: &str) -> Result<Option<u64>> {
        let now = self.clock.now_millis();
        let entries = self.lock()?;
        Ok(entries
            .get(key)
            .filter(|entry| is_live(entry, now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at - now))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| RateLimitError::Internal("Failed to acquire keyspace lock".into()))
    }

    fn execute(&self, call: &ScriptCall) -> Result<Reply> {
        let now = self.clock.now_millis();
        let mut entries = self.lock()?;

        let last_sweep = self.last_sweep.load(Ordering::Relaxed);
        if now.saturating_sub(last_sweep) >= SWEEP_INTERVAL_MS {
            self.last_sweep.store(now, Ordering::Relaxed);
            let removed = sweep(&mut entries, now);
            if removed > 0 {
                tracing::debug!(removed, remaining = entries.len(), "Swept expired keys");
            }
        }

        let mut keyspace = Keyspace {
            entries: &mut entries,
            now,
        };
        call.script.run_native(&mut keyspace, &call.keys, &call.args)
    }
}

#[async_trait]
impl ScriptStore for MemoryStore {
    async fn eval(&self, call: &ScriptCall) -> Result<Reply> {
        self.execute(call)
    }
}

impl BlockingScriptStore for MemoryStore {
    fn eval(&self, call: &ScriptCall) -> Result<Reply> {
        self.execute(call)
    }
}

fn is_live(entry: &Entry, now: u64) -> bool {
    entry.expires_at.map_or(true, |at| at > now)
}

fn sweep(entries: &mut HashMap<String, Entry>, now: u64) -> usize {
    let initial_count = entries.len();
    entries.retain(|_, entry| is_live(entry, now));
    initial_count - entries.len()
}

fn wrong_type(key: &str) -> RateLimitError {
    redis::RedisError::from((
        redis::ErrorKind::TypeError,
        "WRONGTYPE Operation against a key holding the wrong kind of value",
        key.to_string(),
    ))
    .into()
}

/// Keyspace view handed to a native script for the duration of one call.
struct Keyspace<'a> {
    entries: &'a mut HashMap<String, Entry>,
    now: u64,
}

impl Keyspace<'_> {
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let expired = self.entries.get(key).map_or(false, |entry| !is_live(entry, self.now));
        if expired {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }
}

impl Commands for Keyspace<'_> {
    fn get(&mut self, key: &str) -> Result<Option<i64>> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                value: StoredValue::Counter(value),
                ..
            }) => Ok(Some(*value)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn incr_by(&mut self, key: &str, by: i64) -> Result<i64> {
        match self.live(key) {
            Some(Entry {
                value: StoredValue::Counter(value),
                ..
            }) => {
                *value = value.checked_add(by).ok_or_else(|| {
                    RateLimitError::from(redis::RedisError::from((
                        redis::ErrorKind::ResponseError,
                        "increment or decrement would overflow",
                        key.to_string(),
                    )))
                })?;
                Ok(*value)
            }
            Some(_) => Err(wrong_type(key)),
            None => {
                self.entries.insert(
                    key.to_string(),
                    Entry {
                        value: StoredValue::Counter(by),
                        expires_at: None,
                    },
                );
                Ok(by)
            }
        }
    }

    fn pexpire(&mut self, key: &str, ttl_millis: i64) {
        if ttl_millis <= 0 {
            self.entries.remove(key);
            return;
        }
        let now = self.now;
        if let Some(entry) = self.live(key) {
            entry.expires_at = Some(now.saturating_add(ttl_millis as u64));
        }
    }

    fn exists(&mut self, keys: &[String]) -> i64 {
        keys.iter().filter(|key| self.live(key).is_some()).count() as i64
    }

    fn hmget(&mut self, key: &str, fields: &[&str]) -> Result<Vec<Option<i64>>> {
        match self.live(key) {
            None => Ok(vec![None; fields.len()]),
            Some(Entry {
                value: StoredValue::Hash(hash),
                ..
            }) => Ok(fields.iter().map(|field| hash.get(*field).copied()).collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn hset(&mut self, key: &str, fields: &[(&str, i64)]) -> Result<()> {
        match self.live(key) {
            Some(Entry {
                value: StoredValue::Hash(hash),
                ..
            }) => {
                for (field, value) in fields {
                    hash.insert((*field).to_string(), *value);
                }
                Ok(())
            }
            Some(_) => Err(wrong_type(key)),
            None => {
                let hash = fields
                    .iter()
                    .map(|(field, value)| ((*field).to_string(), *value))
                    .collect();
                self.entries.insert(
                    key.to_string(),
                    Entry {
                        value: StoredValue::Hash(hash),
                        expires_at: None,
                    },
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::script::Script;
    use std::time::Duration;

    fn counter_script(commands: &mut dyn Commands, keys: &[String], args: &[i64]) -> Result<Reply> {
        let value = commands.incr_by(&keys[0], args[0])?;
        if value == args[0] {
            commands.pexpire(&keys[0], args[1]);
        }
        Ok(Reply::Int(value))
    }

    static COUNTER: Script = Script {
        name: "test_counter",
        lua: "",
        native: counter_script,
    };

    fn call(key: &str, by: i64, ttl: i64) -> ScriptCall {
        ScriptCall::new(&COUNTER, vec![key.to_string()], vec![by, ttl])
    }

    #[test]
    fn test_counter_expires() {
        let clock = ManualClock::new(0);
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));

        assert_eq!(BlockingScriptStore::eval(&store, &call("k", 1, 100)).unwrap(), Reply::Int(1));
        assert_eq!(BlockingScriptStore::eval(&store, &call("k", 2, 100)).unwrap(), Reply::Int(3));
        assert_eq!(store.ttl_millis("k").unwrap(), Some(100));

        clock.advance(Duration::from_millis(100));
        assert!(store.is_empty().unwrap());
        assert_eq!(BlockingScriptStore::eval(&store, &call("k", 1, 100)).unwrap(), Reply::Int(1));
    }

    #[test]
    fn test_hash_commands() {
        let store = MemoryStore::new();
        let mut entries = store.lock().unwrap();
        let mut keyspace = Keyspace {
            entries: &mut entries,
            now: 0,
        };

        assert_eq!(keyspace.hmget("h", &["a", "b"]).unwrap(), vec![None, None]);
        keyspace.hset("h", &[("a", 1), ("b", 2)]).unwrap();
        keyspace.hset("h", &[("b", 5)]).unwrap();
        assert_eq!(keyspace.hmget("h", &["a", "b"]).unwrap(), vec![Some(1), Some(5)]);
        assert_eq!(keyspace.exists(&["h".to_string(), "missing".to_string()]), 1);

        let err = keyspace.incr_by("h", 1).unwrap_err();
        assert!(err.is_store_error());
    }

    #[test]
    fn test_expired_window_keys_are_swept() {
        use crate::limiter::Limiter;
        use crate::ratelimit::BlockingRatelimit;
        use crate::units::TimeUnit;

        let clock = ManualClock::new(0);
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        let algorithm = Limiter::default().fixed_window(5, 1, TimeUnit::Seconds).unwrap();
        let ratelimit = BlockingRatelimit::new(store.clone(), algorithm).with_clock(Arc::new(clock.clone()));

        for _ in 0..10_000 {
            assert!(ratelimit.limit("user").unwrap().allowed);
            clock.advance(Duration::from_secs(1));
        }

        // Every window key has its own name, so none of them is ever read twice.
        let raw_entries = store.lock().unwrap().len();
        assert!(raw_entries <= (SWEEP_INTERVAL_MS / 1_000) as usize + 1, "{} keys kept", raw_entries);
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn test_purge_expired() {
        let clock = ManualClock::new(0);
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));

        BlockingScriptStore::eval(&store, &call("short", 1, 100)).unwrap();
        BlockingScriptStore::eval(&store, &call("long", 1, 5_000)).unwrap();
        clock.advance(Duration::from_millis(200));

        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.lock().unwrap().len(), 1);
        assert_eq!(store.purge_expired().unwrap(), 0);
    }

    #[test]
    fn test_counter_overflow_is_store_error_and_keeps_store_usable() {
        let store = MemoryStore::new();

        BlockingScriptStore::eval(&store, &call("k", i64::MAX, 60_000)).unwrap();
        let err = BlockingScriptStore::eval(&store, &call("k", 1, 60_000)).unwrap_err();
        assert!(err.is_store_error());

        assert_eq!(BlockingScriptStore::eval(&store, &call("other", 1, 60_000)).unwrap(), Reply::Int(1));
    }

    #[test]
    fn test_non_positive_expiry_deletes() {
        let store = MemoryStore::new();
        let mut entries = store.lock().unwrap();
        let mut keyspace = Keyspace {
            entries: &mut entries,
            now: 0,
        };

        keyspace.incr_by("k", 1).unwrap();
        keyspace.pexpire("k", 0);
        assert_eq!(keyspace.get("k").unwrap(), None);
    }
}

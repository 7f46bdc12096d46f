//! Read-only scripts shared by the algorithms' metadata queries.

use crate::error::Result;
use crate::script::{Commands, Reply, Script};

fn read_counters(commands: &mut dyn Commands, keys: &[String], _args: &[i64]) -> Result<Reply> {
    keys.iter()
        .map(|key| commands.get(key).map(Reply::optional))
        .collect::<Result<Vec<_>>>()
        .map(Reply::Array)
}

fn count_existing(commands: &mut dyn Commands, keys: &[String], _args: &[i64]) -> Result<Reply> {
    Ok(Reply::Int(commands.exists(keys)))
}

fn read_bucket(commands: &mut dyn Commands, keys: &[String], _args: &[i64]) -> Result<Reply> {
    let bucket = commands.hmget(&keys[0], &["updated_at", "tokens"])?;
    Ok(Reply::Array(bucket.into_iter().map(Reply::optional).collect()))
}

/// Current value of every counter in KEYS, nil for missing ones.
pub static READ_COUNTERS: Script = Script {
    name: "read_counters",
    lua: r#"
    local counters = {}
    for i, key in ipairs(KEYS) do
      counters[i] = redis.call("GET", key)
    end
    return counters
    "#,
    native: read_counters,
};

/// How many of KEYS currently exist.
pub static COUNT_EXISTING: Script = Script {
    name: "count_existing",
    lua: r#"
    return redis.call("EXISTS", unpack(KEYS))
    "#,
    native: count_existing,
};

/// `{updated_at, tokens}` of a token bucket, nils when it does not exist.
pub static READ_BUCKET: Script = Script {
    name: "read_bucket",
    lua: r#"
    return redis.call("HMGET", KEYS[1], "updated_at", "tokens")
    "#,
    native: read_bucket,
};

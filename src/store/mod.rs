//! Script stores: Redis for shared state across processes, memory for a
//! single process and tests.

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::{BlockingRedisStore, RedisStore};

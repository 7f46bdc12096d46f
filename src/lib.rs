pub mod algorithms;
pub mod blocker;
pub mod clock;
pub mod config;
pub mod config_validator;
pub mod error;
pub mod limiter;
pub mod ratelimit;
pub mod response;
pub mod script;
pub mod sleeper;
pub mod store;
pub mod units;

pub use algorithms::{Algorithm, AlgorithmKind};
pub use config::Config;
pub use error::{RateLimitError, Result};
pub use limiter::Limiter;
pub use ratelimit::{BlockingRatelimit, Ratelimit};
pub use response::Response;
pub use store::{BlockingRedisStore, MemoryStore, RedisStore};
pub use units::TimeUnit;

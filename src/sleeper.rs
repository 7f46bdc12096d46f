//! Abstraction for sleeping between blocking-wait retries
//!
//! Enables fast, deterministic tests without real time delays

use crate::clock::ManualClock;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Suspends the current task.
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Suspends the current thread.
pub trait BlockingSleeper: Send + Sync + std::fmt::Debug {
    fn sleep(&self, duration: Duration);
}

/// Production sleeper using tokio runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Production sleeper parking the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl BlockingSleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

// Sleeping on a manual clock moves it forward instead of waiting.
impl Sleeper for ManualClock {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        self.advance(duration);
        Box::pin(async {})
    }
}

impl BlockingSleeper for ManualClock {
    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

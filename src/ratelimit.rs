//! Binds an algorithm to a store: the public decision API.

use crate::algorithms::{validate_cost, Algorithm};
use crate::blocker;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::response::Response;
use crate::script::{BlockingScriptStore, ScriptStore};
use crate::sleeper::{BlockingSleeper, Sleeper, ThreadSleeper, TokioSleeper};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

fn log_decision(algorithm: &Algorithm, identifier: &str, response: &Response) {
    debug!(
        algorithm = %algorithm.kind(),
        identifier,
        allowed = response.allowed,
        remaining = response.remaining,
        reset = response.reset,
        "Rate limit decision"
    );
}

/// Rate limiter for async callers.
///
/// Holds only configuration; all state lives in the store. Share it freely
/// across tasks (wrap in `Arc` or clone it).
#[derive(Clone)]
pub struct Ratelimit<S> {
    store: S,
    algorithm: Arc<Algorithm>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl<S: ScriptStore> Ratelimit<S> {
    pub fn new(store: S, algorithm: Algorithm) -> Self {
        Self {
            store,
            algorithm: Arc::new(algorithm),
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn algorithm(&self) -> &Algorithm {
        &self.algorithm
    }

    /// Decide whether one request from `identifier` may pass.
    pub async fn limit(&self, identifier: &str) -> Result<Response> {
        self.limit_with_cost(identifier, 1).await
    }

    /// Decide whether a request worth `cost` units may pass.
    pub async fn limit_with_cost(&self, identifier: &str, cost: u64) -> Result<Response> {
        let cost = validate_cost(cost)?;
        let now = self.clock.now_millis();

        let call = self.algorithm.limit_call(identifier, now, cost);
        let reply = self.store.eval(&call).await?;
        let response = self.algorithm.limit_response(reply, now)?;

        log_decision(&self.algorithm, identifier, &response);
        Ok(response)
    }

    /// Requests `identifier` may still make right now, without consuming any.
    pub async fn remaining(&self, identifier: &str) -> Result<u64> {
        let now = self.clock.now_millis();
        let reply = self.store.eval(&self.algorithm.remaining_call(identifier, now)).await?;
        self.algorithm.remaining_from(reply, now)
    }

    /// When capacity is next restored, `None` if `identifier` is not tracked.
    pub async fn reset(&self, identifier: &str) -> Result<Option<u64>> {
        let now = self.clock.now_millis();
        let reply = self.store.eval(&self.algorithm.reset_call(identifier, now)).await?;
        self.algorithm.reset_from(reply, now)
    }

    /// Retries until the request is allowed or `timeout` has passed; returns
    /// the last response either way.
    pub async fn block_until_ready(&self, identifier: &str, timeout: Duration) -> Result<Response> {
        blocker::block_until_ready(self.clock.as_ref(), self.sleeper.as_ref(), timeout, || {
            self.limit(identifier)
        })
        .await
    }
}

/// Rate limiter for blocking callers.
#[derive(Clone)]
pub struct BlockingRatelimit<S> {
    store: S,
    algorithm: Arc<Algorithm>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn BlockingSleeper>,
}

impl<S: BlockingScriptStore> BlockingRatelimit<S> {
    pub fn new(store: S, algorithm: Algorithm) -> Self {
        Self {
            store,
            algorithm: Arc::new(algorithm),
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn BlockingSleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn algorithm(&self) -> &Algorithm {
        &self.algorithm
    }

    pub fn limit(&self, identifier: &str) -> Result<Response> {
        self.limit_with_cost(identifier, 1)
    }

    pub fn limit_with_cost(&self, identifier: &str, cost: u64) -> Result<Response> {
        let cost = validate_cost(cost)?;
        let now = self.clock.now_millis();

        let call = self.algorithm.limit_call(identifier, now, cost);
        let reply = self.store.eval(&call)?;
        let response = self.algorithm.limit_response(reply, now)?;

        log_decision(&self.algorithm, identifier, &response);
        Ok(response)
    }

    pub fn remaining(&self, identifier: &str) -> Result<u64> {
        let now = self.clock.now_millis();
        let reply = self.store.eval(&self.algorithm.remaining_call(identifier, now))?;
        self.algorithm.remaining_from(reply, now)
    }

    pub fn reset(&self, identifier: &str) -> Result<Option<u64>> {
        let now = self.clock.now_millis();
        let reply = self.store.eval(&self.algorithm.reset_call(identifier, now))?;
        self.algorithm.reset_from(reply, now)
    }

    pub fn block_until_ready(&self, identifier: &str, timeout: Duration) -> Result<Response> {
        blocker::block_until_ready_blocking(self.clock.as_ref(), self.sleeper.as_ref(), timeout, || {
            self.limit(identifier)
        })
    }
}

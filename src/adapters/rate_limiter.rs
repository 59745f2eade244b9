//! Process-wide token-bucket rate limiter
//!
//! One bucket per request category plus a global bucket and a per-agent
//! hourly bucket. An acquisition takes one token from the category, global
//! and agent buckets together or from none of them. Refill is lazy, computed
//! from elapsed time whenever the buckets are consulted.
//!
//! Callers of one category queue on a fair async mutex, so waiters are served
//! in arrival order. The bucket state sits behind a short synchronous lock
//! that is never held across an await.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::ports::RequestCategory;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RateLimitError {
    #[error("Rate limit timeout: no {category} token within {waited:?}")]
    Timeout {
        category: RequestCategory,
        waited: Duration,
    },
}

/// Request budgets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateBudget {
    pub trade_per_min: u32,
    pub price_per_min: u32,
    pub balance_per_min: u32,
    pub global_per_min: u32,
    pub agent_per_hour: u32,
    pub acquire_timeout: Duration,
}

impl Default for RateBudget {
    fn default() -> Self {
        Self {
            trade_per_min: 100,
            price_per_min: 300,
            balance_per_min: 30,
            global_per_min: 3000,
            agent_per_hour: 10_000,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Classic token bucket
#[derive(Debug, Clone)]
pub struct TokenBucket {
    name: &'static str,
    capacity: f64,
    tokens: f64,
    /// Tokens per second
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Starts full
    pub fn new(name: &'static str, capacity: u32, refill_rate: f64, now: Instant) -> Self {
        Self {
            name,
            capacity: capacity as f64,
            tokens: capacity as f64,
            refill_rate,
            last_refill: now,
        }
    }

    pub fn per_minute(name: &'static str, per_min: u32, now: Instant) -> Self {
        Self::new(name, per_min, per_min as f64 / 60.0, now)
    }

    pub fn per_hour(name: &'static str, per_hour: u32, now: Instant) -> Self {
        Self::new(name, per_hour, per_hour as f64 / 3600.0, now)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Tokens available at `now`
    pub fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    /// Time until one whole token is available
    fn wait_for_one(&self) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        if !(self.refill_rate > 0.0) {
            return Duration::MAX;
        }
        Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate)
    }
}

#[derive(Debug)]
struct Buckets {
    categories: HashMap<RequestCategory, TokenBucket>,
    global: TokenBucket,
    agent: TokenBucket,
}

impl Buckets {
    /// Take one token from each relevant bucket, or report how long to wait
    fn try_take(&mut self, category: RequestCategory, now: Instant) -> Result<(), Duration> {
        let mut wait = Duration::ZERO;
        for bucket in [
            self.categories.get_mut(&category),
            Some(&mut self.global),
            Some(&mut self.agent),
        ]
        .into_iter()
        .flatten()
        {
            bucket.refill(now);
            wait = wait.max(bucket.wait_for_one());
        }
        if wait > Duration::ZERO {
            return Err(wait);
        }

        if let Some(bucket) = self.categories.get_mut(&category) {
            bucket.tokens -= 1.0;
        }
        self.global.tokens -= 1.0;
        self.agent.tokens -= 1.0;
        Ok(())
    }
}

pub struct RateLimiter {
    buckets: Mutex<Buckets>,
    gates: HashMap<RequestCategory, tokio::sync::Mutex<()>>,
    default_timeout: Duration,
}

impl RateLimiter {
    pub fn new(budget: &RateBudget) -> Self {
        let now = Instant::now();
        let categories = HashMap::from([
            (
                RequestCategory::Trade,
                TokenBucket::per_minute("trade", budget.trade_per_min, now),
            ),
            (
                RequestCategory::PriceQuery,
                TokenBucket::per_minute("price_query", budget.price_per_min, now),
            ),
            (
                RequestCategory::BalanceCheck,
                TokenBucket::per_minute("balance_check", budget.balance_per_min, now),
            ),
        ]);
        let gates = RequestCategory::ALL
            .iter()
            .map(|c| (*c, tokio::sync::Mutex::new(())))
            .collect();

        Self {
            buckets: Mutex::new(Buckets {
                categories,
                global: TokenBucket::per_minute("global", budget.global_per_min, now),
                agent: TokenBucket::per_hour("agent", budget.agent_per_hour, now),
            }),
            gates,
            default_timeout: budget.acquire_timeout,
        }
    }

    fn buckets(&self) -> MutexGuard<'_, Buckets> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Wait for a token in `category` for at most `timeout`.
    ///
    /// Fails as soon as the required wait provably overruns the deadline.
    pub async fn acquire(&self, category: RequestCategory, timeout: Duration) -> Result<(), RateLimitError> {
        let started = Instant::now();
        let deadline = started
            .checked_add(timeout)
            .unwrap_or_else(|| started + Duration::from_secs(365 * 24 * 3600));
        let timed_out = || RateLimitError::Timeout {
            category,
            waited: started.elapsed(),
        };

        let _turn = match self.gates.get(&category) {
            Some(gate) => Some(
                tokio::time::timeout_at(deadline, gate.lock())
                    .await
                    .map_err(|_| timed_out())?,
            ),
            None => None,
        };

        loop {
            let now = Instant::now();
            let outcome = self.buckets().try_take(category, now);
            match outcome {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    let ready_at = now.checked_add(wait);
                    match ready_at {
                        Some(ready_at) if ready_at <= deadline => {
                            tracing::trace!("{} bucket empty, waiting {:?}", category, wait);
                            tokio::time::sleep_until(ready_at).await;
                        }
                        _ => {
                            tracing::debug!("{} acquisition would exceed {:?}", category, timeout);
                            return Err(timed_out());
                        }
                    }
                }
            }
        }
    }

    /// Acquire with the configured default timeout
    pub async fn acquire_default(&self, category: RequestCategory) -> Result<(), RateLimitError> {
        self.acquire(category, self.default_timeout).await
    }

    /// Tokens left in a category bucket
    pub fn available(&self, category: RequestCategory) -> f64 {
        let now = Instant::now();
        let mut buckets = self.buckets();
        buckets
            .categories
            .get_mut(&category)
            .map_or(0.0, |b| b.available(now))
    }

    pub fn global_available(&self) -> f64 {
        let now = Instant::now();
        self.buckets().global.available(now)
    }

    pub fn agent_available(&self) -> f64 {
        let now = Instant::now();
        self.buckets().agent.available(now)
    }
}

//! Retry policy with exponential backoff and jitter
//!
//! An operation reports each try as an [`Attempt`]; [`run_with_retry`]
//! decides whether to back off and try again or to stop.
//!
//! Delay formula: `min(max_delay, base * 2^retry) ± jitter * delay`

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ports::TransportError;

/// Outcome of a single try
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T, E> {
    Success(T),
    /// Worth another try after a backoff
    Transient(E),
    /// Stop immediately
    Permanent(E),
}

impl<T> From<Result<T, TransportError>> for Attempt<T, TransportError> {
    fn from(result: Result<T, TransportError>) -> Self {
        match result {
            Ok(value) => Attempt::Success(value),
            Err(e) if e.is_transient() => Attempt::Transient(e),
            Err(e) => Attempt::Permanent(e),
        }
    }
}

/// Why a retried operation gave up
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    Permanent(E),
    Exhausted { attempts: u32, last: E },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first try
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay, 0..=1
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.base_delay, self.max_delay, self.jitter)
    }

    /// Upper bound on time spent sleeping between tries
    pub fn max_total_delay(&self) -> Duration {
        let mut backoff = ExponentialBackoff::new(self.base_delay, self.max_delay, 0.0);
        (0..self.max_retries)
            .map(|_| backoff.next_delay())
            .fold(Duration::ZERO, |acc, d| acc.saturating_add(d))
            .mul_f64(1.0 + self.jitter.clamp(0.0, 1.0))
    }
}

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max_delay: Duration,
    jitter_factor: f64,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            base,
            max_delay,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    /// Next delay; advances the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let exp_delay = self.base.saturating_mul(2u32.saturating_pow(self.attempt));
        let capped = exp_delay.min(self.max_delay);

        let jitter_range = capped.as_secs_f64() * self.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        self.attempt = self.attempt.saturating_add(1);
        Duration::from_secs_f64((capped.as_secs_f64() + jitter).max(0.0))
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of retries.
///
/// `operation` receives the zero-based try number.
pub async fn run_with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let mut backoff = policy.backoff();
    let mut try_number = 0u32;

    loop {
        match operation(try_number).await {
            Attempt::Success(value) => return Ok(value),
            Attempt::Permanent(e) => return Err(RetryError::Permanent(e)),
            Attempt::Transient(e) => {
                if try_number >= policy.max_retries {
                    return Err(RetryError::Exhausted {
                        attempts: try_number + 1,
                        last: e,
                    });
                }
                let delay = backoff.next_delay();
                tracing::warn!(
                    "Transient failure: {} - retrying in {:?} (attempt {}/{})",
                    e,
                    delay,
                    try_number + 1,
                    policy.max_retries + 1
                );
                tokio::time::sleep(delay).await;
                try_number += 1;
            }
        }
    }
}

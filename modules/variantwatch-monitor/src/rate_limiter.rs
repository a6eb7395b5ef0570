//! Token-bucket rate limiting for calls to the quota-limited platform API.
//!
//! One `RateLimiter` is built at startup and cloned into every component that
//! talks to the platform. Clones share the same bucket.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limiter misconfigured: bucket is empty and refill rate is zero")]
    NoRefill,
}

/// Errors that carry a platform "slow down" signal (HTTP 429).
pub trait RateLimitSignal {
    fn is_rate_limited(&self) -> bool;
}

/// Failure of a call routed through `RateLimiter::call_with_backoff`.
#[derive(Debug, Error)]
pub enum CallError<E> {
    #[error(transparent)]
    Limiter(#[from] RateLimitError),

    /// Still rate limited after every attempt in the backoff policy.
    #[error("still rate limited after {attempts} attempts: {source}")]
    Exhausted { attempts: u32, source: E },

    /// The call failed for a reason other than rate limiting. Not retried.
    #[error(transparent)]
    Call(E),
}

impl<E> CallError<E> {
    /// The underlying call error, if the call itself ran and failed.
    pub fn call_error(&self) -> Option<&E> {
        match self {
            CallError::Call(e) | CallError::Exhausted { source: e, .. } => Some(e),
            CallError::Limiter(_) => None,
        }
    }
}

/// Bucket state. Always mutated under the limiter's single lock.
#[derive(Debug)]
pub struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens,
            max_tokens,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    /// Credit tokens for the time since the last refill, capped at capacity.
    /// A clock that appears to go backwards credits nothing.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }

    fn try_take(&mut self) -> bool {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// How long until one whole token is available. None if it never will be.
    fn time_until_token(&self) -> Option<Duration> {
        if self.refill_rate <= 0.0 {
            return None;
        }
        let missing = (1.0 - self.tokens).max(0.0);
        Some(Duration::from_secs_f64(missing / self.refill_rate))
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    bucket: Arc<Mutex<TokenBucket>>,
}

impl RateLimiter {
    pub fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            bucket: Arc::new(Mutex::new(TokenBucket::new(max_tokens, refill_rate))),
        }
    }

    /// Burst capacity equals the per-minute quota; steady rate is quota / 60 per second.
    pub fn per_minute(calls_per_minute: u32) -> Self {
        let quota = f64::from(calls_per_minute);
        Self::new(quota, quota / 60.0)
    }

    fn lock(&self) -> MutexGuard<'_, TokenBucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until a token is available, then consume it. Sleeps instead of spinning.
    /// Fails fast when the bucket is empty and can never refill.
    pub async fn acquire(&self) -> Result<(), RateLimitError> {
        loop {
            let wait = {
                let mut bucket = self.lock();
                bucket.refill(Instant::now());
                if bucket.try_take() {
                    return Ok(());
                }
                bucket.time_until_token().ok_or(RateLimitError::NoRefill)?
            };
            debug!(wait_ms = wait.as_millis() as u64, "Waiting for rate limit token");
            tokio::time::sleep(wait).await;
        }
    }

    /// Take a token if one is available right now. Leaves the bucket untouched otherwise.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.lock();
        bucket.refill(Instant::now());
        bucket.try_take()
    }

    /// Tokens currently in the bucket (after refill).
    pub fn available(&self) -> f64 {
        let mut bucket = self.lock();
        bucket.refill(Instant::now());
        bucket.tokens
    }

    /// Run `op` behind a token. A rate-limited failure is retried after the
    /// policy's next delay (taking a fresh token each attempt); any other
    /// failure is returned immediately.
    pub async fn call_with_backoff<T, E, F, Fut>(
        &self,
        policy: &BackoffPolicy,
        mut op: F,
    ) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RateLimitSignal + std::fmt::Display,
    {
        let mut delays = policy.delays().into_iter();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.acquire().await?;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_rate_limited() => match delays.next() {
                    Some(delay) => {
                        warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Rate limited by platform, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return Err(CallError::Exhausted {
                            attempts: attempt,
                            source: e,
                        })
                    }
                },
                Err(e) => return Err(CallError::Call(e)),
            }
        }
    }
}

/// Exponential backoff: `initial`, doubling each retry, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max_delay: Duration,
    /// Total attempts including the first.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    /// 0.5s, 1s, 2s, 4s between five attempts; never more than 32s.
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max_delay: Duration::from_secs(32),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// A policy that retries `retries` times starting at `initial`.
    pub fn with_retries(initial: Duration, retries: u32) -> Self {
        Self {
            initial,
            max_delay: Duration::from_secs(32),
            max_attempts: retries + 1,
        }
    }

    /// Short policy for transient infrastructure errors at a call site.
    pub fn transient() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            max_attempts: 3,
        }
    }

    /// The sleep before each retry, in order.
    pub fn delays(&self) -> Vec<Duration> {
        let retries = self.max_attempts.saturating_sub(1);
        (0..retries)
            .map(|i| {
                let factor = 2u32.saturating_pow(i);
                self.initial.saturating_mul(factor).min(self.max_delay)
            })
            .collect()
    }
}

/// Retry `op` while `should_retry` accepts the error, sleeping per `policy`.
pub async fn retry_with<T, E, F, Fut>(
    policy: &BackoffPolicy,
    should_retry: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delays = policy.delays().into_iter();
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if should_retry(&e) => match delays.next() {
                Some(delay) => {
                    warn!(delay_ms = delay.as_millis() as u64, error = %e, "Transient failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}

//! Bounded retry policies: capped exponential backoff with jitter, and a retry helper.
//!
//! All sleeps go through `tokio::time`, so tests drive them with a paused clock.

use crate::config::{ReconnectionConfig, RetryConfig};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Capped exponential backoff: `initial * 2^n`, never above `max`, plus up to `jitter` extra.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    jitter: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            jitter: Duration::from_millis(500),
            attempt: 0,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay for the n-th consecutive failure (0-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// Jittered delay for the n-th failure, without touching the counter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay(attempt) + self.jitter_sample()
    }

    /// Next delay; advances the failure counter.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        base + self.jitter_sample()
    }

    /// Call after a success so the next failure starts from `initial` again.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    fn jitter_sample(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}

impl From<&ReconnectionConfig> for Backoff {
    fn from(c: &ReconnectionConfig) -> Self {
        Backoff::new(
            Duration::from_secs(c.initial_backoff_secs),
            Duration::from_secs(c.max_backoff_secs),
        )
    }
}

impl From<&RetryConfig> for Backoff {
    fn from(c: &RetryConfig) -> Self {
        Backoff::new(
            Duration::from_secs(c.initial_backoff_secs),
            Duration::from_secs(c.max_backoff_secs),
        )
    }
}

/// Bounded retry: at most `max_attempts` tries, sleeping per `backoff` in between.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Run `op` until it succeeds, `max_attempts` is reached, or `cancel` fires.
    /// Returns the last error in the latter two cases.
    pub async fn retry<T, E, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut backoff = self.backoff.clone();
        backoff.reset();
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::debug!(reason = %e, attempt, ?delay, "retrying");
                    if !sleep_or_cancel(delay, cancel).await {
                        return Err(e);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Sleep for `duration` unless cancelled first. Returns `false` if cancelled.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

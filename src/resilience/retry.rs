//! Retry/backoff executor.
//!
//! A [`RetryPolicy`] wraps a single-attempt closure. Failures are classified as
//! retryable or terminal; retryable ones wait according to a [`BackoffStrategy`]
//! (exponential by default, overridden by a server-supplied `Retry-After`).
//! The async path sleeps with `tokio::time::sleep` so other tasks keep running;
//! the blocking path uses `std::thread::sleep`.

use crate::{Error, Result};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Predicate deciding whether a failure is worth another attempt.
pub type Classifier = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Maps a failure and its 1-based attempt number to the wait before the next attempt.
pub trait BackoffStrategy: Send + Sync {
    fn delay(&self, error: &Error, attempt: u32) -> Duration;
}

/// `base * 2^(attempt-1)`, capped at `max`, unless the error carries a
/// server-supplied delay and `honor_server_delay` is set.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
    pub honor_server_delay: bool,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            honor_server_delay: true,
        }
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn delay(&self, error: &Error, attempt: u32) -> Duration {
        if self.honor_server_delay {
            if let Some(server) = error.retry_after() {
                return server;
            }
        }
        let shift = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(shift).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Outcome of evaluating a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { delay: Duration },
    Fail,
}

/// Information handed to each attempt.
#[derive(Debug, Clone, Copy)]
pub struct Attempt {
    /// 1-based attempt number.
    pub number: u32,
    /// Budget left under the overall deadline, if one is set.
    pub remaining: Option<Duration>,
}

/// Immutable per-call retry configuration.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub deadline: Option<Duration>,
    classifier: Classifier,
    backoff: Arc<dyn BackoffStrategy>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// Exponential backoff from `base_delay` with the default classifier.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            deadline: None,
            classifier: Arc::new(Error::is_retryable),
            backoff: Arc::new(ExponentialBackoff::new(
                base_delay,
                base_delay.saturating_mul(1 << 10),
            )),
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn from_config(cfg: &crate::config::ClientConfig) -> Self {
        let mut policy = Self::new(cfg.max_attempts, cfg.base_delay)
            .with_backoff(ExponentialBackoff::new(cfg.base_delay, cfg.max_delay));
        policy.deadline = cfg.deadline;
        policy
    }

    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn with_backoff<B: BackoffStrategy + 'static>(mut self, backoff: B) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    /// Cap the total time spent across attempts and waits.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn is_retryable(&self, error: &Error) -> bool {
        (self.classifier)(error)
    }

    pub fn delay_for(&self, error: &Error, attempt: u32) -> Duration {
        self.backoff.delay(error, attempt)
    }

    /// Decide what follows failed attempt `attempt` (1-based) after `elapsed`.
    pub fn decide(&self, error: &Error, attempt: u32, elapsed: Duration) -> Decision {
        if attempt >= self.max_attempts || !self.is_retryable(error) {
            return Decision::Fail;
        }
        let delay = self.delay_for(error, attempt);
        if let Some(deadline) = self.deadline {
            if elapsed.saturating_add(delay) >= deadline {
                return Decision::Fail;
            }
        }
        Decision::Retry { delay }
    }

    fn remaining(&self, elapsed: Duration) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_sub(elapsed))
    }

    /// Run `op` until it succeeds, fails terminally, or the budget is spent.
    ///
    /// The surfaced error is the last failure, unchanged in kind, annotated
    /// with the number of attempts made.
    pub fn execute_blocking<T, F>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(Attempt) -> Result<T>,
    {
        let start = Instant::now();
        let mut attempt = 1;
        loop {
            let info = Attempt {
                number: attempt,
                remaining: self.remaining(start.elapsed()),
            };
            match op(info) {
                Ok(v) => return Ok(v),
                Err(err) => match self.decide(&err, attempt, start.elapsed()) {
                    Decision::Retry { delay } => {
                        log_retry(&err, attempt, self.max_attempts, delay);
                        std::thread::sleep(delay);
                        attempt += 1;
                    }
                    Decision::Fail => return Err(err.with_attempts(attempt)),
                },
            }
        }
    }

    /// Async counterpart of [`RetryPolicy::execute_blocking`].
    ///
    /// With a deadline set, each attempt is bounded by the remaining budget and
    /// overrunning it yields a terminal `Timeout`.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start = tokio::time::Instant::now();
        let mut attempt = 1;
        loop {
            let remaining = self.remaining(start.elapsed());
            let info = Attempt {
                number: attempt,
                remaining,
            };
            let outcome = match remaining {
                Some(budget) => match tokio::time::timeout(budget, op(info)).await {
                    Ok(r) => r,
                    Err(_) => {
                        return Err(Error::timeout(format!(
                            "overall deadline of {}ms exceeded",
                            budget.as_millis()
                        ))
                        .with_attempts(attempt))
                    }
                },
                None => op(info).await,
            };
            match outcome {
                Ok(v) => return Ok(v),
                Err(err) => match self.decide(&err, attempt, start.elapsed()) {
                    Decision::Retry { delay } => {
                        log_retry(&err, attempt, self.max_attempts, delay);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Decision::Fail => return Err(err.with_attempts(attempt)),
                },
            }
        }
    }
}

fn log_retry(err: &Error, attempt: u32, max_attempts: u32, delay: Duration) {
    info!(
        attempt,
        max_attempts,
        delay_ms = delay.as_millis() as u64,
        error_kind = %err.kind(),
        "retrying after transient failure"
    );
}

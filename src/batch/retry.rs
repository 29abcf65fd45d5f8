//! Bounded retry with exponential backoff.
//!
//! The policy is a pure wrapper: it invokes the operation, sleeps between
//! attempts and bounds each attempt with a timeout. It performs no other I/O.

use std::future::Future;
use std::time::Duration;

use super::executor::{FailureDetail, FailureKind, TaskFailure, TaskResult};

/// Default number of attempts per item, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for exponential backoff.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Default multiplier applied to the delay after a rate-limit response.
pub const DEFAULT_RATE_LIMIT_MULTIPLIER: u32 = 4;

/// Upper bound on any single backoff sleep.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Default per-attempt timeout.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry policy applied around every executor call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts allowed, at least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each following one.
    pub base_delay: Duration,
    /// Extra factor for `RateLimited` failures.
    pub rate_limit_multiplier: u32,
    /// Cap on a single sleep.
    pub max_delay: Duration,
    /// Timeout for one attempt. Exceeding it is a transient failure.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            rate_limit_multiplier: DEFAULT_RATE_LIMIT_MULTIPLIER,
            max_delay: DEFAULT_MAX_DELAY,
            attempt_timeout: Some(DEFAULT_ATTEMPT_TIMEOUT),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempts and base delay and default
    /// values for everything else.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Default::default()
        }
    }

    /// Policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn with_rate_limit_multiplier(mut self, multiplier: u32) -> Self {
        self.rate_limit_multiplier = multiplier.max(1);
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Sleep before the attempt following the failed attempt `attempt_index`
    /// (0-based): `base_delay * 2^attempt_index`, times the rate-limit
    /// multiplier for `RateLimited`, capped at `max_delay`.
    pub fn delay_for(&self, kind: FailureKind, attempt_index: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt_index);
        let mut delay = self.base_delay.saturating_mul(factor);
        if kind == FailureKind::RateLimited {
            delay = delay.saturating_mul(self.rate_limit_multiplier);
        }
        delay.min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 0-based attempt index. The returned failure carries
    /// the number of attempts made and whether retries were exhausted.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> TaskResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TaskFailure>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            let outcome = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, op(attempt)).await {
                    Ok(result) => result,
                    Err(_) => Err(TaskFailure::transient(format!(
                        "attempt timed out after {}s",
                        limit.as_secs_f64()
                    ))),
                },
                None => op(attempt).await,
            };

            let failure = match outcome {
                Ok(value) => return TaskResult::Success(value),
                Err(failure) => failure,
            };
            let attempts_made = attempt + 1;

            if !failure.is_retryable() {
                return TaskResult::Failure(FailureDetail::single(failure, attempts_made));
            }

            if attempts_made >= max_attempts {
                return TaskResult::Failure(FailureDetail {
                    kind: failure.kind,
                    message: failure.message,
                    attempts: attempts_made,
                    exhausted: max_attempts > 1,
                });
            }

            let delay = self.delay_for(failure.kind, attempt);
            tracing::debug!(
                attempt = attempts_made,
                max_attempts,
                kind = %failure.kind,
                delay_ms = delay.as_millis() as u64,
                error = %failure.message,
                "Retryable failure, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Runs `op` with `max_attempts` and `base_delay` and default settings
/// otherwise.
pub async fn with_retry<T, F, Fut>(op: F, max_attempts: u32, base_delay: Duration) -> TaskResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, TaskFailure>>,
{
    RetryPolicy::new(max_attempts, base_delay).run(op).await
}

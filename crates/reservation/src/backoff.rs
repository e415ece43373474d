//! Bounded retry with linear backoff.

use std::future::Future;
use std::time::Duration;

/// Default ceiling on a single backoff delay, as a multiple of the base.
const DEFAULT_MAX_MULTIPLIER: u32 = 10;

/// Linear backoff: the delay after the n-th failed attempt is `base * n`,
/// capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max_delay: Duration,
}

impl BackoffPolicy {
    /// Linear backoff capped at ten times the base delay.
    pub fn linear(base: Duration) -> Self {
        Self {
            base,
            max_delay: base.saturating_mul(DEFAULT_MAX_MULTIPLIER),
        }
    }

    /// Retries immediately, yielding to the scheduler between attempts.
    pub fn immediate() -> Self {
        Self::linear(Duration::ZERO)
    }

    /// Overrides the per-delay ceiling.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(attempt).min(self.max_delay)
    }

    /// Upper bound on the total time spent sleeping across `max_attempts`.
    pub fn total_delay(&self, max_attempts: u32) -> Duration {
        (1..max_attempts)
            .map(|attempt| self.delay_for(attempt))
            .fold(Duration::ZERO, Duration::saturating_add)
    }

    async fn wait(&self, attempt: u32) {
        let delay = self.delay_for(attempt);
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Result of a bounded retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// The operation produced a value on the given attempt.
    Succeeded { value: T, attempts: u32 },
    /// Every attempt reported contention.
    Exhausted { attempts: u32 },
}

/// Runs `op` up to `max_attempts` times, sleeping per `policy` between tries.
///
/// `op` receives the 1-based attempt number and returns `Ok(Some(value))` on
/// success, `Ok(None)` to request another attempt, or `Err` to stop at once.
/// No delay follows the final attempt.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &BackoffPolicy,
    max_attempts: u32,
    mut op: F,
) -> Result<RetryOutcome<T>, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    for attempt in 1..=max_attempts {
        if let Some(value) = op(attempt).await? {
            return Ok(RetryOutcome::Succeeded {
                value,
                attempts: attempt,
            });
        }
        if attempt < max_attempts {
            policy.wait(attempt).await;
        }
    }

    Ok(RetryOutcome::Exhausted {
        attempts: max_attempts,
    })
}

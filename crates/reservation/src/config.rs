//! Per-call reservation parameters.

use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::error::{ReservationError, Result};

/// Lock and retry parameters for one reservation call.
///
/// Has no `Default`. The lock TTL must exceed the observed worst-case critical
/// section (stock check plus decrement for every line) with margin; a lock
/// that expires mid-section no longer excludes other holders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationConfig {
    /// Time-to-live of every SKU lock.
    pub lock_ttl: Duration,
    /// Maximum set-if-absent attempts per SKU before `LockTimeout`.
    pub max_lock_attempts: u32,
    /// Delay schedule between contended attempts.
    pub backoff: BackoffPolicy,
}

impl ReservationConfig {
    /// Creates a configuration with linear backoff from `backoff_base`.
    pub fn new(lock_ttl: Duration, max_lock_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            lock_ttl,
            max_lock_attempts,
            backoff: BackoffPolicy::linear(backoff_base),
        }
    }

    /// Creates a configuration from the millisecond values used on the wire.
    pub fn from_millis(ttl_ms: u64, max_lock_attempts: u32, backoff_base_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(ttl_ms),
            max_lock_attempts,
            Duration::from_millis(backoff_base_ms),
        )
    }

    /// Replaces the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Rejects configurations that cannot provide bounded mutual exclusion.
    pub fn validate(&self) -> Result<()> {
        if self.lock_ttl.is_zero() {
            return Err(ReservationError::InvalidRequest(
                "lock TTL must be positive".to_string(),
            ));
        }
        if self.max_lock_attempts == 0 {
            return Err(ReservationError::InvalidRequest(
                "max lock attempts must be at least 1".to_string(),
            ));
        }
        if self.backoff.max_delay() < self.backoff.base() {
            return Err(ReservationError::InvalidRequest(
                "backoff ceiling must not be below its base delay".to_string(),
            ));
        }
        Ok(())
    }

    /// Worst-case time spent sleeping while acquiring a single SKU lock.
    pub fn max_acquire_wait(&self) -> Duration {
        self.backoff.total_delay(self.max_lock_attempts)
    }
}

use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// Outcome of a conditional counter decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrementOutcome {
    /// The decrement was applied; carries the post-decrement value.
    Applied(i64),
    /// The counter held less than the requested amount and was left untouched.
    /// Carries the value observed at rejection time (zero for a missing key).
    Insufficient(i64),
}

impl DecrementOutcome {
    /// Returns the post-decrement value if the decrement was applied.
    pub fn applied(self) -> Option<i64> {
        match self {
            DecrementOutcome::Applied(value) => Some(value),
            DecrementOutcome::Insufficient(_) => None,
        }
    }
}

/// Narrow client to a shared key-value store with atomic primitives.
///
/// Every mutation is a single atomic step on the store side; implementations
/// never read-then-write without such a guard. Operations do not retry
/// internally: a connectivity fault surfaces as `StoreError::Unavailable` and
/// the caller decides what to do with it.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Stores `value` under `key` only if no live entry exists.
    ///
    /// The entry expires passively after `ttl`. Returns true if the value was
    /// stored, false if another live entry already occupies the key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Deletes `key` only if its live value equals `expected`.
    ///
    /// Returns false when the key is absent, expired, or holds another value.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool>;

    /// Returns the live value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Returns the current value of a counter, or None if it was never set.
    async fn get_counter(&self, key: &str) -> Result<Option<i64>>;

    /// Overwrites a counter. Negative values are rejected.
    async fn set_counter(&self, key: &str, value: i64) -> Result<()>;

    /// Subtracts `amount` from a counter only if the result stays non-negative.
    async fn decrement_if_sufficient(&self, key: &str, amount: i64) -> Result<DecrementOutcome>;

    /// Adds `amount` to a counter, creating it at `amount` if missing.
    /// Returns the post-increment value.
    async fn increment(&self, key: &str, amount: i64) -> Result<i64>;
}

#[async_trait]
impl<T: CoordinationStore + ?Sized> CoordinationStore for std::sync::Arc<T> {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        (**self).set_if_absent(key, value, ttl).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        (**self).compare_and_delete(key, expected).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key).await
    }

    async fn get_counter(&self, key: &str) -> Result<Option<i64>> {
        (**self).get_counter(key).await
    }

    async fn set_counter(&self, key: &str, value: i64) -> Result<()> {
        (**self).set_counter(key, value).await
    }

    async fn decrement_if_sufficient(&self, key: &str, amount: i64) -> Result<DecrementOutcome> {
        (**self).decrement_if_sufficient(key, amount).await
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        (**self).increment(key, amount).await
    }
}

/// Validates an amount passed to a counter mutation.
pub(crate) fn validate_amount(key: &str, amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(crate::StoreError::invalid(key, "amount must be positive"));
    }
    Ok(())
}

//! Per-SKU mutual exclusion over the coordination store.

use common::{OwnerToken, SkuId};
use coordination_store::CoordinationStore;

use crate::backoff::{RetryOutcome, retry_with_backoff};
use crate::config::ReservationConfig;
use crate::error::{ReservationError, Result};

/// Acquires and releases fenced per-SKU locks.
///
/// Every acquisition attempt mints a fresh [`OwnerToken`] and stores it under
/// `lock:<sku_id>` with set-if-absent. Release is compare-and-delete on that
/// token, so a holder whose lock expired and was reclaimed cannot remove the
/// new holder's lock.
#[derive(Debug, Clone)]
pub struct LockManager<S> {
    store: S,
}

impl<S: CoordinationStore> LockManager<S> {
    /// Creates a lock manager over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Acquires the lock for `sku_id`, retrying with backoff on contention.
    ///
    /// Store faults stop the loop immediately; only contention is retried.
    #[tracing::instrument(skip_all, fields(sku_id = %sku_id))]
    pub async fn acquire(&self, sku_id: &SkuId, config: &ReservationConfig) -> Result<OwnerToken> {
        let key = sku_id.lock_key();
        let store = &self.store;
        let key_ref = key.as_str();
        let ttl = config.lock_ttl;

        let outcome = retry_with_backoff(
            &config.backoff,
            config.max_lock_attempts,
            move |attempt| async move {
                metrics::counter!("lock_acquire_attempts_total").increment(1);
                let token = OwnerToken::new();
                let acquired = store
                    .set_if_absent(key_ref, &token.to_string(), ttl)
                    .await?;
                if !acquired {
                    tracing::debug!(attempt, "lock held by another owner");
                }
                Ok::<_, ReservationError>(acquired.then_some(token))
            },
        )
        .await?;

        match outcome {
            RetryOutcome::Succeeded { value, attempts } => {
                metrics::counter!("lock_acquired_total").increment(1);
                tracing::debug!(attempts, owner_token = %value, "lock acquired");
                Ok(value)
            }
            RetryOutcome::Exhausted { attempts } => {
                metrics::counter!("lock_timeouts_total").increment(1);
                tracing::warn!(attempts, "lock acquisition timed out");
                Err(ReservationError::LockTimeout {
                    sku_id: sku_id.clone(),
                    attempts,
                })
            }
        }
    }

    /// Releases the lock for `sku_id` if `owner_token` still holds it.
    ///
    /// Returns false, without error, when the lock is already gone or now
    /// belongs to another token. The latter is logged as a fencing violation.
    #[tracing::instrument(skip_all, fields(sku_id = %sku_id, owner_token = %owner_token))]
    pub async fn release(&self, sku_id: &SkuId, owner_token: OwnerToken) -> Result<bool> {
        let key = sku_id.lock_key();
        let token = owner_token.to_string();

        if self.store.compare_and_delete(&key, &token).await? {
            tracing::debug!("lock released");
            return Ok(true);
        }

        match self.store.get(&key).await? {
            Some(holder) if holder != token => {
                metrics::counter!("lock_fencing_violations_total").increment(1);
                tracing::warn!(
                    current_holder = %holder,
                    "release refused: lock expired and was reacquired by another owner"
                );
            }
            _ => tracing::debug!("lock already expired or released"),
        }
        Ok(false)
    }

    /// Confirms that `owner_token` still holds the lock for `sku_id`.
    ///
    /// Fails with `FencingViolation` if the lock expired or changed hands.
    pub async fn ensure_held(&self, sku_id: &SkuId, owner_token: OwnerToken) -> Result<()> {
        let holder = self.store.get(&sku_id.lock_key()).await?;
        if holder.as_deref() == Some(owner_token.to_string().as_str()) {
            return Ok(());
        }

        metrics::counter!("lock_fencing_violations_total").increment(1);
        tracing::error!(
            sku_id = %sku_id,
            owner_token = %owner_token,
            current_holder = ?holder,
            "lock lost inside critical section; lock TTL is shorter than the critical section"
        );
        Err(ReservationError::FencingViolation {
            sku_id: sku_id.clone(),
            owner_token,
        })
    }
}

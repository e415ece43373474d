//! Reservation coordinator for multi-SKU checkouts.

use std::time::{Duration, Instant};

use common::SkuId;
use coordination_store::CoordinationStore;
use uuid::Uuid;

use crate::attempt::{
    CheckoutReservation, Compensation, LineItem, ReservationAttempt, ReservedLine,
};
use crate::config::ReservationConfig;
use crate::error::{ReservationError, Result};
use crate::ledger::StockLedger;
use crate::lock::LockManager;
use crate::state::ReservationState;

/// How long a compensation claim is remembered; retries must arrive sooner.
const COMPENSATION_CLAIM_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Orchestrates one checkout: lock every SKU, decrement every line, unlock.
///
/// Locks are taken in ascending SKU order so that concurrent checkouts with
/// overlapping SKU sets cannot deadlock. On any failure, decrements already
/// applied are reversed and every held lock is released before returning.
/// The coordinator keeps no state between calls; concurrent checkouts meet
/// only in the coordination store.
#[derive(Debug, Clone)]
pub struct ReservationCoordinator<S> {
    locks: LockManager<S>,
    ledger: StockLedger<S>,
}

impl<S> ReservationCoordinator<S>
where
    S: CoordinationStore + Clone,
{
    /// Creates a coordinator whose lock manager and ledger share `store`.
    pub fn new(store: S) -> Self {
        Self {
            locks: LockManager::new(store.clone()),
            ledger: StockLedger::new(store),
        }
    }

    pub fn locks(&self) -> &LockManager<S> {
        &self.locks
    }

    pub fn ledger(&self) -> &StockLedger<S> {
        &self.ledger
    }

    /// Reserves stock for every item, or for none of them.
    ///
    /// Repeated SKUs are merged. On success every lock has been released and
    /// the returned lines carry each SKU's post-decrement quantity. The caller
    /// persists its order afterwards and calls [`Self::compensate`] if that
    /// fails.
    #[tracing::instrument(skip_all, fields(line_count = items.len()))]
    pub async fn reserve_for_checkout(
        &self,
        items: &[LineItem],
        config: &ReservationConfig,
    ) -> Result<CheckoutReservation> {
        config.validate()?;
        let mut attempt = ReservationAttempt::new(items)?;

        metrics::counter!("checkout_reservations_total").increment(1);
        let started = Instant::now();

        let result = match self.lock_and_reserve(&mut attempt, config).await {
            Ok(()) => {
                self.release_locks(&mut attempt).await;
                attempt
                    .transition(ReservationState::Committed)
                    .map(|()| attempt.to_reservation())
            }
            Err(err) => {
                self.abort(&mut attempt).await;
                Err(err)
            }
        };

        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());
        match &result {
            Ok(reservation) => {
                metrics::counter!("checkout_committed_total").increment(1);
                tracing::info!(
                    attempt_id = %reservation.attempt_id,
                    skus = reservation.lines.len(),
                    "checkout reservation committed"
                );
            }
            Err(err) => {
                metrics::counter!("checkout_failed_total", "kind" => err.kind()).increment(1);
                tracing::info!(
                    attempt_id = %attempt.id(),
                    kind = err.kind(),
                    sku_id = ?err.sku_id(),
                    "checkout reservation failed"
                );
            }
        }

        result
    }

    /// Restores stock for a reservation whose order was not persisted.
    ///
    /// Each line is restored at most once per `attempt_id`, so the call is
    /// safe to retry. Increments need no lock. Stops at the first store
    /// failure and reports which SKUs this call restored; the retry then
    /// restores only the rest.
    #[tracing::instrument(skip_all, fields(attempt_id = %attempt_id, line_count = items.len()))]
    pub async fn compensate(&self, attempt_id: Uuid, items: &[LineItem]) -> Result<Compensation> {
        let attempt = ReservationAttempt::new(items)?;
        let mut compensation = Compensation {
            attempt_id,
            restored: Vec::with_capacity(attempt.lines().len()),
            already_compensated: Vec::new(),
        };

        for line in attempt.lines() {
            let claim_key = line.sku_id.compensation_key(attempt_id);
            let released = self
                .ledger
                .release_once(&claim_key, &line.sku_id, line.quantity, COMPENSATION_CLAIM_TTL)
                .await;

            match released {
                Ok(Some(new_quantity)) => compensation.restored.push(ReservedLine {
                    sku_id: line.sku_id.clone(),
                    quantity: line.quantity,
                    new_quantity,
                }),
                Ok(None) => compensation.already_compensated.push(line.sku_id.clone()),
                Err(err) => {
                    tracing::error!(
                        sku_id = %line.sku_id,
                        quantity = line.quantity,
                        error = %err,
                        "compensation stopped"
                    );
                    return Err(ReservationError::CompensationIncomplete {
                        failed_sku: line.sku_id.clone(),
                        restored: compensation
                            .restored
                            .into_iter()
                            .map(|line| line.sku_id)
                            .collect(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        if !compensation.restored.is_empty() {
            metrics::counter!("checkout_compensations_total").increment(1);
        }
        tracing::info!(
            restored = compensation.restored.len(),
            already_compensated = compensation.already_compensated.len(),
            "reservation compensated"
        );
        Ok(compensation)
    }

    /// Overwrites a SKU's available quantity while holding its lock.
    ///
    /// A checkout rolling back this SKU cannot land on top of the new value.
    #[tracing::instrument(skip_all, fields(sku_id = %sku_id, quantity = quantity))]
    pub async fn set_stock(
        &self,
        sku_id: &SkuId,
        quantity: i64,
        config: &ReservationConfig,
    ) -> Result<()> {
        config.validate()?;
        let token = self.locks.acquire(sku_id, config).await?;

        let result = match self.locks.ensure_held(sku_id, token).await {
            Ok(()) => self.ledger.set_stock(sku_id, quantity).await,
            Err(err) => Err(err),
        };

        match self.locks.release(sku_id, token).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!("lock was no longer held after restock"),
            Err(err) => tracing::warn!(error = %err, "lock release failed; lock will lapse at TTL"),
        }
        result
    }

    /// Acquires every lock in canonical order, then decrements every line.
    async fn lock_and_reserve(
        &self,
        attempt: &mut ReservationAttempt,
        config: &ReservationConfig,
    ) -> Result<()> {
        for index in 0..attempt.lines().len() {
            let sku_id = attempt.lines()[index].sku_id.clone();
            let token = self.locks.acquire(&sku_id, config).await?;
            attempt.record_lock(index, token);
        }
        attempt.transition(ReservationState::Locked)?;

        let critical_section = Instant::now();
        for index in 0..attempt.lines().len() {
            let line = &attempt.lines()[index];
            let sku_id = line.sku_id.clone();
            let quantity = line.quantity;
            let token = line
                .lock_owner_token
                .ok_or_else(|| ReservationError::Internal(format!("no lock held for {sku_id}")))?;

            self.locks.ensure_held(&sku_id, token).await?;
            let remaining = self.ledger.reserve(&sku_id, quantity).await?;
            attempt.record_decrement(index, remaining);
        }
        attempt.transition(ReservationState::Validated)?;

        let elapsed = critical_section.elapsed();
        if elapsed > config.lock_ttl / 2 {
            tracing::warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                lock_ttl_ms = config.lock_ttl.as_millis() as u64,
                "critical section used more than half of the lock TTL"
            );
        }
        Ok(())
    }

    /// Failure path: reverse applied decrements, then release held locks.
    async fn abort(&self, attempt: &mut ReservationAttempt) {
        let had_all_locks = attempt.state() == ReservationState::Locked;
        advance(attempt, ReservationState::Failed);

        if had_all_locks {
            self.roll_back(attempt).await;
            advance(attempt, ReservationState::RolledBack);
        }

        self.release_locks(attempt).await;
        advance(attempt, ReservationState::Released);
    }

    async fn roll_back(&self, attempt: &mut ReservationAttempt) {
        let mut reversed = 0;
        for index in (0..attempt.lines().len()).rev() {
            let line = &attempt.lines()[index];
            if !line.decrement_applied {
                continue;
            }
            let sku_id = line.sku_id.clone();
            let quantity = line.quantity;

            match self.ledger.release(&sku_id, quantity).await {
                Ok(_) => {
                    attempt.clear_decrement(index);
                    reversed += 1;
                }
                Err(err) => tracing::error!(
                    sku_id = %sku_id,
                    quantity,
                    error = %err,
                    "failed to restore stock during rollback"
                ),
            }
        }

        if reversed > 0 {
            metrics::counter!("checkout_rollbacks_total").increment(1);
            tracing::info!(attempt_id = %attempt.id(), reversed, "decrements rolled back");
        }
    }

    /// Releases held locks in reverse acquisition order.
    ///
    /// Release failures are logged only; such locks lapse when their TTL ends.
    async fn release_locks(&self, attempt: &mut ReservationAttempt) {
        for index in (0..attempt.lines().len()).rev() {
            let Some(token) = attempt.take_lock(index) else {
                continue;
            };
            let sku_id = &attempt.lines()[index].sku_id;

            match self.locks.release(sku_id, token).await {
                Ok(true) => {}
                Ok(false) => tracing::warn!(
                    sku_id = %sku_id,
                    "lock was no longer held at release; lock TTL may be too short"
                ),
                Err(err) => tracing::warn!(
                    sku_id = %sku_id,
                    error = %err,
                    "lock release failed; lock will lapse at TTL"
                ),
            }
        }
    }
}

impl<S> ReservationCoordinator<S>
where
    S: CoordinationStore + Clone + 'static,
{
    /// Like [`Self::reserve_for_checkout`], bounded by a wall-clock deadline.
    ///
    /// The attempt runs on its own task so that its cleanup always completes.
    /// If the deadline passes first the caller gets `DeadlineExceeded`, and a
    /// reservation that commits afterwards is compensated in the background.
    pub async fn reserve_for_checkout_within(
        &self,
        items: Vec<LineItem>,
        config: ReservationConfig,
        deadline: Duration,
    ) -> Result<CheckoutReservation> {
        let coordinator = self.clone();
        let mut handle =
            tokio::spawn(async move { coordinator.reserve_for_checkout(&items, &config).await });

        match tokio::time::timeout(deadline, &mut handle).await {
            Ok(joined) => joined.map_err(|err| ReservationError::Internal(err.to_string()))?,
            Err(_) => {
                metrics::counter!("checkout_deadline_exceeded_total").increment(1);
                tracing::warn!(
                    deadline_ms = deadline.as_millis() as u64,
                    "reservation deadline exceeded"
                );

                let coordinator = self.clone();
                tokio::spawn(async move {
                    if let Ok(Ok(reservation)) = handle.await {
                        tracing::warn!(
                            attempt_id = %reservation.attempt_id,
                            "compensating reservation committed after its deadline"
                        );
                        let items = reservation.line_items();
                        if let Err(err) =
                            coordinator.compensate(reservation.attempt_id, &items).await
                        {
                            tracing::error!(error = %err, "late reservation compensation failed");
                        }
                    }
                });

                Err(ReservationError::DeadlineExceeded(deadline))
            }
        }
    }
}

fn advance(attempt: &mut ReservationAttempt, next: ReservationState) {
    if let Err(err) = attempt.transition(next) {
        tracing::error!(attempt_id = %attempt.id(), error = %err, "unexpected attempt state");
    }
}

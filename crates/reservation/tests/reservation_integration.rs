//! Integration tests for checkout reservations under concurrency.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::SkuId;
use coordination_store::{
    CoordinationStore, DecrementOutcome, InMemoryCoordinationStore, Result as StoreResult,
    StoreError,
};
use futures_util::future::join_all;
use reservation::{LineItem, ReservationConfig, ReservationCoordinator, ReservationError};
use tokio::sync::{Mutex, Notify};

/// One observed store event, in the order the store applied it.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Acquired { key: String, owner: String },
    Released { key: String, owner: String },
    Decremented { key: String },
}

/// Wraps the in-memory store and records lock holders and decrements.
///
/// The log mutex is held across each inner call so the recorded order is the
/// order in which the store applied the operations.
#[derive(Clone, Default)]
struct RecordingStore {
    inner: InMemoryCoordinationStore,
    log: Arc<Mutex<Vec<Event>>>,
}

impl RecordingStore {
    async fn events(&self) -> Vec<Event> {
        self.log.lock().await.clone()
    }
}

#[async_trait]
impl CoordinationStore for RecordingStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut log = self.log.lock().await;
        let stored = self.inner.set_if_absent(key, value, ttl).await?;
        if stored {
            log.push(Event::Acquired {
                key: key.to_string(),
                owner: value.to_string(),
            });
        }
        Ok(stored)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut log = self.log.lock().await;
        let deleted = self.inner.compare_and_delete(key, expected).await?;
        if deleted {
            log.push(Event::Released {
                key: key.to_string(),
                owner: expected.to_string(),
            });
        }
        Ok(deleted)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn get_counter(&self, key: &str) -> StoreResult<Option<i64>> {
        self.inner.get_counter(key).await
    }

    async fn set_counter(&self, key: &str, value: i64) -> StoreResult<()> {
        self.inner.set_counter(key, value).await
    }

    async fn decrement_if_sufficient(
        &self,
        key: &str,
        amount: i64,
    ) -> StoreResult<DecrementOutcome> {
        let mut log = self.log.lock().await;
        let outcome = self.inner.decrement_if_sufficient(key, amount).await?;
        if outcome.applied().is_some() {
            log.push(Event::Decremented {
                key: key.to_string(),
            });
        }
        Ok(outcome)
    }

    async fn increment(&self, key: &str, amount: i64) -> StoreResult<i64> {
        self.inner.increment(key, amount).await
    }
}

/// Loses every lock right after it is granted, as if the TTL lapsed.
#[derive(Clone, Default)]
struct ExpiringStore {
    inner: InMemoryCoordinationStore,
}

#[async_trait]
impl CoordinationStore for ExpiringStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let stored = self.inner.set_if_absent(key, value, ttl).await?;
        if stored {
            self.inner.expire(key).await;
        }
        Ok(stored)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        self.inner.compare_and_delete(key, expected).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn get_counter(&self, key: &str) -> StoreResult<Option<i64>> {
        self.inner.get_counter(key).await
    }

    async fn set_counter(&self, key: &str, value: i64) -> StoreResult<()> {
        self.inner.set_counter(key, value).await
    }

    async fn decrement_if_sufficient(
        &self,
        key: &str,
        amount: i64,
    ) -> StoreResult<DecrementOutcome> {
        self.inner.decrement_if_sufficient(key, amount).await
    }

    async fn increment(&self, key: &str, amount: i64) -> StoreResult<i64> {
        self.inner.increment(key, amount).await
    }
}

/// Fails counter writes once their budget runs out and can stall after each
/// applied decrement.
#[derive(Clone)]
struct FaultyStore {
    inner: InMemoryCoordinationStore,
    decrements_allowed: Arc<AtomicI64>,
    increments_allowed: Arc<AtomicI64>,
    decrement_delay: Duration,
    decremented: Arc<Notify>,
}

impl FaultyStore {
    fn new() -> Self {
        Self {
            inner: InMemoryCoordinationStore::new(),
            decrements_allowed: Arc::new(AtomicI64::new(i64::MAX)),
            increments_allowed: Arc::new(AtomicI64::new(i64::MAX)),
            decrement_delay: Duration::ZERO,
            decremented: Arc::new(Notify::new()),
        }
    }

    fn with_decrement_delay(mut self, delay: Duration) -> Self {
        self.decrement_delay = delay;
        self
    }

    fn allow_decrements(&self, count: i64) {
        self.decrements_allowed.store(count, Ordering::SeqCst);
    }

    fn allow_increments(&self, count: i64) {
        self.increments_allowed.store(count, Ordering::SeqCst);
    }

    fn spend(budget: &AtomicI64, key: &str) -> StoreResult<()> {
        if budget.fetch_sub(1, Ordering::SeqCst) <= 0 {
            return Err(StoreError::Unavailable(format!("injected fault on {key}")));
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationStore for FaultyStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        self.inner.compare_and_delete(key, expected).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn get_counter(&self, key: &str) -> StoreResult<Option<i64>> {
        self.inner.get_counter(key).await
    }

    async fn set_counter(&self, key: &str, value: i64) -> StoreResult<()> {
        self.inner.set_counter(key, value).await
    }

    async fn decrement_if_sufficient(
        &self,
        key: &str,
        amount: i64,
    ) -> StoreResult<DecrementOutcome> {
        Self::spend(&self.decrements_allowed, key)?;
        let outcome = self.inner.decrement_if_sufficient(key, amount).await?;
        if outcome.applied().is_some() {
            self.decremented.notify_one();
            if !self.decrement_delay.is_zero() {
                tokio::time::sleep(self.decrement_delay).await;
            }
        }
        Ok(outcome)
    }

    async fn increment(&self, key: &str, amount: i64) -> StoreResult<i64> {
        Self::spend(&self.increments_allowed, key)?;
        self.inner.increment(key, amount).await
    }
}

/// Generous retry budget so contention resolves rather than timing out.
fn contended_config() -> ReservationConfig {
    ReservationConfig::new(Duration::from_secs(5), 500, Duration::from_millis(1))
}

async fn seed<S: CoordinationStore + Clone>(
    coordinator: &ReservationCoordinator<S>,
    stock: &[(&str, i64)],
) {
    for (sku, quantity) in stock {
        coordinator
            .ledger()
            .set_stock(&SkuId::new(*sku), *quantity)
            .await
            .unwrap();
    }
}

async fn available<S: CoordinationStore + Clone>(
    coordinator: &ReservationCoordinator<S>,
    sku: &str,
) -> i64 {
    coordinator
        .ledger()
        .available(&SkuId::new(sku))
        .await
        .unwrap()
        .unwrap_or_default()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_oversell_under_concurrent_checkouts() {
    let coordinator = ReservationCoordinator::new(InMemoryCoordinationStore::new());
    seed(&coordinator, &[("tea-001", 7)]).await;

    let tasks = (0..40).map(|_| {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .reserve_for_checkout(&[LineItem::new("tea-001", 1)], &contended_config())
                .await
        })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let committed = results.iter().filter(|result| result.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|result| matches!(result, Err(ReservationError::InsufficientStock { .. })))
        .count();

    assert_eq!(committed, 7);
    assert_eq!(rejected, 33);
    assert_eq!(available(&coordinator, "tea-001").await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lock_holders_never_overlap() {
    let store = RecordingStore::default();
    let coordinator = ReservationCoordinator::new(store.clone());
    seed(&coordinator, &[("A", 100), ("B", 100), ("C", 100)]).await;

    let baskets = [
        vec![LineItem::new("A", 1), LineItem::new("B", 1)],
        vec![LineItem::new("B", 1), LineItem::new("C", 1)],
        vec![LineItem::new("C", 1), LineItem::new("A", 1)],
    ];
    let tasks = (0..30).map(|i| {
        let coordinator = coordinator.clone();
        let items = baskets[i % baskets.len()].clone();
        tokio::spawn(async move {
            coordinator
                .reserve_for_checkout(&items, &contended_config())
                .await
        })
    });
    for joined in join_all(tasks).await {
        joined.unwrap().unwrap();
    }

    let mut holders: HashMap<String, String> = HashMap::new();
    let mut decrements = 0;
    for event in store.events().await {
        match event {
            Event::Acquired { key, owner } => {
                let previous = holders.insert(key.clone(), owner);
                assert!(previous.is_none(), "{key} granted while already held");
            }
            Event::Released { key, owner } => {
                assert_eq!(holders.remove(&key).as_ref(), Some(&owner));
            }
            Event::Decremented { key } => {
                let sku = key.trim_start_matches("stock:");
                assert!(
                    holders.contains_key(&format!("lock:{sku}")),
                    "{key} decremented without its lock held"
                );
                decrements += 1;
            }
        }
    }

    assert!(holders.is_empty());
    assert_eq!(decrements, 60);
    assert_eq!(available(&coordinator, "A").await, 80);
    assert_eq!(available(&coordinator, "B").await, 80);
    assert_eq!(available(&coordinator, "C").await, 80);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_input_orders_do_not_deadlock() {
    let store = InMemoryCoordinationStore::new();
    let coordinator = ReservationCoordinator::new(store.clone());
    seed(&coordinator, &[("A", 50), ("B", 50)]).await;

    let tasks = (0..20).map(|i| {
        let coordinator = coordinator.clone();
        let items = if i % 2 == 0 {
            vec![LineItem::new("A", 1), LineItem::new("B", 1)]
        } else {
            vec![LineItem::new("B", 1), LineItem::new("A", 1)]
        };
        tokio::spawn(async move {
            coordinator
                .reserve_for_checkout(&items, &contended_config())
                .await
        })
    });

    let results = tokio::time::timeout(Duration::from_secs(10), join_all(tasks))
        .await
        .expect("checkouts deadlocked");
    for joined in results {
        joined.unwrap().unwrap();
    }

    assert_eq!(available(&coordinator, "A").await, 30);
    assert_eq!(available(&coordinator, "B").await, 30);
    assert_eq!(store.live_lock_count().await, 0);
}

#[tokio::test]
async fn test_release_is_idempotent_and_fenced() {
    let store = InMemoryCoordinationStore::new();
    let coordinator = ReservationCoordinator::new(store.clone());
    let locks = coordinator.locks();
    let sku = SkuId::new("tea-001");

    let stale = locks.acquire(&sku, &contended_config()).await.unwrap();
    assert!(locks.release(&sku, stale).await.unwrap());
    assert!(!locks.release(&sku, stale).await.unwrap());

    let stale = locks.acquire(&sku, &contended_config()).await.unwrap();
    store.expire("lock:tea-001").await;
    let current = locks.acquire(&sku, &contended_config()).await.unwrap();

    assert!(!locks.release(&sku, stale).await.unwrap());
    assert_eq!(
        store.get("lock:tea-001").await.unwrap(),
        Some(current.to_string())
    );
    assert!(locks.release(&sku, current).await.unwrap());
}

#[tokio::test]
async fn test_rollback_restores_applied_lines() {
    let store = InMemoryCoordinationStore::new();
    let coordinator = ReservationCoordinator::new(store.clone());
    seed(&coordinator, &[("A", 10), ("B", 2)]).await;

    let result = coordinator
        .reserve_for_checkout(
            &[LineItem::new("A", 5), LineItem::new("B", 3)],
            &contended_config(),
        )
        .await;

    match result {
        Err(ReservationError::InsufficientStock {
            sku_id,
            requested,
            available: observed,
        }) => {
            assert_eq!(sku_id, SkuId::new("B"));
            assert_eq!(requested, 3);
            assert_eq!(observed, 2);
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }
    assert_eq!(available(&coordinator, "A").await, 10);
    assert_eq!(available(&coordinator, "B").await, 2);
    assert_eq!(store.live_lock_count().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_last_unit_sold_exactly_once() {
    let coordinator = ReservationCoordinator::new(InMemoryCoordinationStore::new());
    seed(&coordinator, &[("tea-001", 1)]).await;

    let checkout = || {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .reserve_for_checkout(&[LineItem::new("tea-001", 1)], &contended_config())
                .await
        })
    };
    let (first, second) = tokio::join!(checkout(), checkout());
    let results = [first.unwrap(), second.unwrap()];

    let committed: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].lines[0].new_quantity, 0);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(ReservationError::InsufficientStock { sku_id, available: 0, .. })
            if sku_id.as_str() == "tea-001"
    )));
    assert_eq!(available(&coordinator, "tea-001").await, 0);
}

#[tokio::test]
async fn test_lost_lock_aborts_before_decrement() {
    let store = ExpiringStore::default();
    let coordinator = ReservationCoordinator::new(store.clone());
    seed(&coordinator, &[("A", 10)]).await;

    let result = coordinator
        .reserve_for_checkout(&[LineItem::new("A", 1)], &contended_config())
        .await;

    assert!(matches!(
        result,
        Err(ReservationError::FencingViolation { ref sku_id, .. }) if sku_id == &SkuId::new("A")
    ));
    assert_eq!(available(&coordinator, "A").await, 10);
    assert_eq!(store.inner.live_lock_count().await, 0);
}

#[tokio::test]
async fn test_compensation_after_failed_order_persistence() {
    let coordinator = ReservationCoordinator::new(InMemoryCoordinationStore::new());
    seed(&coordinator, &[("tea-001", 3), ("tea-002", 1)]).await;

    let reservation = coordinator
        .reserve_for_checkout(
            &[LineItem::new("tea-002", 1), LineItem::new("tea-001", 2)],
            &contended_config(),
        )
        .await
        .unwrap();
    assert_eq!(available(&coordinator, "tea-002").await, 0);

    // The order service failed to persist; hand the stock back.
    coordinator
        .compensate(reservation.attempt_id, &reservation.line_items())
        .await
        .unwrap();

    assert_eq!(available(&coordinator, "tea-001").await, 3);
    assert_eq!(available(&coordinator, "tea-002").await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_compensation_retries_restore_once() {
    let coordinator = ReservationCoordinator::new(InMemoryCoordinationStore::new());
    seed(&coordinator, &[("A", 10), ("B", 4)]).await;
    let reservation = coordinator
        .reserve_for_checkout(
            &[LineItem::new("A", 3), LineItem::new("B", 4)],
            &contended_config(),
        )
        .await
        .unwrap();

    let tasks = (0..8).map(|_| {
        let coordinator = coordinator.clone();
        let attempt_id = reservation.attempt_id;
        let items = reservation.line_items();
        tokio::spawn(async move { coordinator.compensate(attempt_id, &items).await })
    });
    let restored: usize = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap().restored.len())
        .sum();

    assert_eq!(restored, 2);
    assert_eq!(available(&coordinator, "A").await, 10);
    assert_eq!(available(&coordinator, "B").await, 4);
}

#[tokio::test]
async fn test_compensation_retry_restores_only_remaining_lines() {
    let store = FaultyStore::new();
    let coordinator = ReservationCoordinator::new(store.clone());
    seed(&coordinator, &[("A", 10), ("B", 10)]).await;
    let reservation = coordinator
        .reserve_for_checkout(
            &[LineItem::new("A", 2), LineItem::new("B", 3)],
            &contended_config(),
        )
        .await
        .unwrap();

    store.allow_increments(1);
    let result = coordinator
        .compensate(reservation.attempt_id, &reservation.line_items())
        .await;
    match result {
        Err(ReservationError::CompensationIncomplete {
            failed_sku,
            restored,
            ..
        }) => {
            assert_eq!(failed_sku, SkuId::new("B"));
            assert_eq!(restored, vec![SkuId::new("A")]);
        }
        other => panic!("expected CompensationIncomplete, got {other:?}"),
    }
    assert_eq!(available(&coordinator, "A").await, 10);
    assert_eq!(available(&coordinator, "B").await, 7);

    store.allow_increments(i64::MAX);
    let retry = coordinator
        .compensate(reservation.attempt_id, &reservation.line_items())
        .await
        .unwrap();

    assert_eq!(retry.already_compensated, vec![SkuId::new("A")]);
    assert_eq!(retry.restored.len(), 1);
    assert_eq!(retry.restored[0].sku_id, SkuId::new("B"));
    assert_eq!(available(&coordinator, "A").await, 10);
    assert_eq!(available(&coordinator, "B").await, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restock_is_not_overwritten_by_rollback() {
    let store = FaultyStore::new().with_decrement_delay(Duration::from_millis(20));
    let coordinator = ReservationCoordinator::new(store.clone());
    seed(&coordinator, &[("A", 10), ("B", 2)]).await;

    // The admin restocks A while a failing checkout holds A's decrement.
    let restock = {
        let coordinator = coordinator.clone();
        let decremented = store.decremented.clone();
        tokio::spawn(async move {
            decremented.notified().await;
            coordinator
                .set_stock(&SkuId::new("A"), 10, &contended_config())
                .await
        })
    };

    let result = coordinator
        .reserve_for_checkout(
            &[LineItem::new("A", 5), LineItem::new("B", 3)],
            &contended_config(),
        )
        .await;
    restock.await.unwrap().unwrap();

    assert!(matches!(
        result,
        Err(ReservationError::InsufficientStock { ref sku_id, .. }) if sku_id == &SkuId::new("B")
    ));
    assert_eq!(available(&coordinator, "A").await, 10);
    assert_eq!(store.inner.live_lock_count().await, 0);
}

#[tokio::test]
async fn test_store_failure_mid_attempt_surfaces_original_error() {
    let store = FaultyStore::new();
    let coordinator = ReservationCoordinator::new(store.clone());
    seed(&coordinator, &[("A", 10), ("B", 10)]).await;
    store.allow_decrements(1);
    store.allow_increments(0);

    let result = coordinator
        .reserve_for_checkout(
            &[LineItem::new("A", 5), LineItem::new("B", 3)],
            &contended_config(),
        )
        .await;

    // A's decrement could not be reversed; it stays applied and is logged.
    assert!(matches!(result, Err(ReservationError::StoreUnavailable(_))));
    assert_eq!(available(&coordinator, "A").await, 5);
    assert_eq!(available(&coordinator, "B").await, 10);
    assert_eq!(store.inner.live_lock_count().await, 0);
}

#[tokio::test]
async fn test_store_failure_mid_attempt_rolls_back_applied_lines() {
    let store = FaultyStore::new();
    let coordinator = ReservationCoordinator::new(store.clone());
    seed(&coordinator, &[("A", 10), ("B", 10)]).await;
    store.allow_decrements(1);

    let result = coordinator
        .reserve_for_checkout(
            &[LineItem::new("A", 5), LineItem::new("B", 3)],
            &contended_config(),
        )
        .await;

    assert!(matches!(result, Err(ReservationError::StoreUnavailable(_))));
    assert_eq!(available(&coordinator, "A").await, 10);
    assert_eq!(available(&coordinator, "B").await, 10);
    assert_eq!(store.inner.live_lock_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_commit_after_deadline_is_compensated() {
    let store = FaultyStore::new().with_decrement_delay(Duration::from_millis(500));
    let coordinator = ReservationCoordinator::new(store.clone());
    seed(&coordinator, &[("A", 10), ("B", 4)]).await;

    let result = coordinator
        .reserve_for_checkout_within(
            vec![LineItem::new("A", 2), LineItem::new("B", 1)],
            contended_config(),
            Duration::from_millis(100),
        )
        .await;
    assert!(matches!(result, Err(ReservationError::DeadlineExceeded(_))));

    // Let the attempt commit and the background compensation run.
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(available(&coordinator, "A").await, 10);
    assert_eq!(available(&coordinator, "B").await, 4);
    assert_eq!(store.get("lock:A").await.unwrap(), None);
    assert_eq!(store.get("lock:B").await.unwrap(), None);
}

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::{
    Result, StoreError,
    store::{CoordinationStore, DecrementOutcome, validate_amount},
};

#[derive(Debug, Clone)]
struct LockEntry {
    value: String,
    expires_at: Instant,
}

impl LockEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    locks: HashMap<String, LockEntry>,
    counters: HashMap<String, i64>,
}

/// In-memory coordination store for tests and single-process deployments.
///
/// Expiry is evaluated against `tokio::time::Instant`, so tests running with a
/// paused clock can advance past a TTL deterministically. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCoordinationStore {
    state: Arc<RwLock<MemoryState>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryCoordinationStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail with `StoreError::Unavailable`
    /// until switched back off.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of live (non-expired) set-if-absent entries.
    pub async fn live_lock_count(&self) -> usize {
        let now = Instant::now();
        self.state
            .read()
            .await
            .locks
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    /// Forces the entry under `key` to expire immediately, as if its TTL had
    /// lapsed. The stale value stays in place until overwritten.
    pub async fn expire(&self, key: &str) {
        if let Some(entry) = self.state.write().await.locks.get_mut(key) {
            entry.expires_at = Instant::now();
        }
    }

    /// Clears all locks and counters.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.locks.clear();
        state.counters.clear();
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store switched off".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.check_available()?;
        if ttl.is_zero() {
            return Err(StoreError::invalid(key, "ttl must be positive"));
        }

        let now = Instant::now();
        let mut state = self.state.write().await;

        if let Some(existing) = state.locks.get(key)
            && existing.is_live(now)
        {
            return Ok(false);
        }

        state.locks.insert(
            key.to_string(),
            LockEntry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        self.check_available()?;

        let now = Instant::now();
        let mut state = self.state.write().await;

        match state.locks.get(key) {
            Some(entry) if entry.value == expected => {
                let live = entry.is_live(now);
                state.locks.remove(key);
                Ok(live)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;

        let now = Instant::now();
        let state = self.state.read().await;
        Ok(state
            .locks
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn get_counter(&self, key: &str) -> Result<Option<i64>> {
        self.check_available()?;
        Ok(self.state.read().await.counters.get(key).copied())
    }

    async fn set_counter(&self, key: &str, value: i64) -> Result<()> {
        self.check_available()?;
        if value < 0 {
            return Err(StoreError::invalid(key, "counter cannot be negative"));
        }
        self.state
            .write()
            .await
            .counters
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn decrement_if_sufficient(&self, key: &str, amount: i64) -> Result<DecrementOutcome> {
        self.check_available()?;
        validate_amount(key, amount)?;

        let mut state = self.state.write().await;
        match state.counters.get_mut(key) {
            Some(current) if *current >= amount => {
                *current -= amount;
                Ok(DecrementOutcome::Applied(*current))
            }
            Some(current) => Ok(DecrementOutcome::Insufficient(*current)),
            None => Ok(DecrementOutcome::Insufficient(0)),
        }
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        self.check_available()?;
        validate_amount(key, amount)?;

        let mut state = self.state.write().await;
        let current = state.counters.entry(key.to_string()).or_insert(0);
        *current = current
            .checked_add(amount)
            .ok_or_else(|| StoreError::invalid(key, "counter would overflow"))?;
        Ok(*current)
    }
}

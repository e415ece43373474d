use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::{
    Result, StoreError,
    store::{CoordinationStore, DecrementOutcome, validate_amount},
};

/// PostgreSQL-backed coordination store.
///
/// Lock expiry is evaluated against the database clock (`now()`), so
/// application hosts with skewed clocks still agree on who holds a lock.
#[derive(Clone)]
pub struct PostgresCoordinationStore {
    pool: PgPool,
}

impl PostgresCoordinationStore {
    /// Creates a new PostgreSQL coordination store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool whose acquire timeout bounds how long any single store
    /// call may wait for a connection before reporting `Unavailable`.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl CoordinationStore for PostgresCoordinationStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        if ttl.is_zero() {
            return Err(StoreError::invalid(key, "ttl must be positive"));
        }
        let ttl_ms = ttl.as_millis() as f64;

        // The conflict branch only fires when the existing row has expired.
        let stored: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO coordination_locks (key, owner_token, expires_at)
            VALUES ($1, $2, now() + $3::double precision * interval '1 millisecond')
            ON CONFLICT (key) DO UPDATE
                SET owner_token = EXCLUDED.owner_token,
                    expires_at = EXCLUDED.expires_at
                WHERE coordination_locks.expires_at <= now()
            RETURNING key
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(ttl_ms)
        .fetch_optional(&self.pool)
        .await?;

        Ok(stored.is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let live: Option<bool> = sqlx::query_scalar(
            r#"
            DELETE FROM coordination_locks
            WHERE key = $1 AND owner_token = $2
            RETURNING expires_at > now()
            "#,
        )
        .bind(key)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await?;

        Ok(live.unwrap_or(false))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar(
            "SELECT owner_token FROM coordination_locks WHERE key = $1 AND expires_at > now()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value)
    }

    async fn get_counter(&self, key: &str) -> Result<Option<i64>> {
        let value = sqlx::query_scalar("SELECT value FROM coordination_counters WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value)
    }

    async fn set_counter(&self, key: &str, value: i64) -> Result<()> {
        if value < 0 {
            return Err(StoreError::invalid(key, "counter cannot be negative"));
        }

        sqlx::query(
            r#"
            INSERT INTO coordination_counters (key, value, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (key) DO UPDATE
                SET value = EXCLUDED.value,
                    updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn decrement_if_sufficient(&self, key: &str, amount: i64) -> Result<DecrementOutcome> {
        validate_amount(key, amount)?;

        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE coordination_counters
            SET value = value - $2, updated_at = now()
            WHERE key = $1 AND value >= $2
            RETURNING value
            "#,
        )
        .bind(key)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(value) = remaining {
            return Ok(DecrementOutcome::Applied(value));
        }

        // Informational read only; the rejection above already happened atomically.
        let available = self.get_counter(key).await?.unwrap_or(0);
        Ok(DecrementOutcome::Insufficient(available))
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        validate_amount(key, amount)?;

        let value = sqlx::query_scalar(
            r#"
            INSERT INTO coordination_counters (key, value, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (key) DO UPDATE
                SET value = coordination_counters.value + EXCLUDED.value,
                    updated_at = EXCLUDED.updated_at
            RETURNING value
            "#,
        )
        .bind(key)
        .bind(amount)
        .fetch_one(&self.pool)
        .await?;

        Ok(value)
    }
}

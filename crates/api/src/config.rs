//! Application configuration loaded from environment variables.

use std::time::Duration;

use reservation::ReservationConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` — PostgreSQL coordination store; in-memory when unset
/// - `DATABASE_MAX_CONNECTIONS` — pool size (default: `10`)
/// - `RESERVATION_LOCK_TTL_MS` — SKU lock TTL (default: `5000`)
/// - `RESERVATION_MAX_LOCK_ATTEMPTS` — acquire attempts per SKU (default: `10`)
/// - `RESERVATION_BACKOFF_BASE_MS` — linear backoff step (default: `25`)
/// - `RESERVATION_DEADLINE_MS` — overall checkout deadline (default: `3000`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub lock_ttl_ms: u64,
    pub max_lock_attempts: u32,
    pub backoff_base_ms: u64,
    pub deadline_ms: u64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: parse_env("PORT").unwrap_or(defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),
            lock_ttl_ms: parse_env("RESERVATION_LOCK_TTL_MS").unwrap_or(defaults.lock_ttl_ms),
            max_lock_attempts: parse_env("RESERVATION_MAX_LOCK_ATTEMPTS")
                .unwrap_or(defaults.max_lock_attempts),
            backoff_base_ms: parse_env("RESERVATION_BACKOFF_BASE_MS")
                .unwrap_or(defaults.backoff_base_ms),
            deadline_ms: parse_env("RESERVATION_DEADLINE_MS").unwrap_or(defaults.deadline_ms),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Lock and retry parameters passed to every checkout.
    pub fn reservation_config(&self) -> ReservationConfig {
        ReservationConfig::from_millis(
            self.lock_ttl_ms,
            self.max_lock_attempts,
            self.backoff_base_ms,
        )
    }

    /// Wall-clock bound on a single checkout request.
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            database_max_connections: 10,
            lock_ttl_ms: 5_000,
            max_lock_attempts: 10,
            backoff_base_ms: 25,
            deadline_ms: 3_000,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}

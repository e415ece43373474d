//! API server entry point.

use std::sync::Arc;
use std::time::Duration;

use api::SharedStore;
use api::config::Config;
use coordination_store::{InMemoryCoordinationStore, PostgresCoordinationStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Connects the PostgreSQL store when configured, otherwise an in-memory one.
async fn connect_store(config: &Config) -> SharedStore {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set, using in-memory coordination store");
        return Arc::new(InMemoryCoordinationStore::new());
    };

    let store = PostgresCoordinationStore::connect(
        url,
        config.database_max_connections,
        Duration::from_secs(5),
    )
    .await
    .expect("failed to connect to PostgreSQL");
    store
        .run_migrations()
        .await
        .expect("failed to run coordination store migrations");
    tracing::info!("using PostgreSQL coordination store");
    Arc::new(store)
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");
    api::routes::metrics::describe();

    // 3. Validate the lock budget before accepting traffic
    let reservation = config.reservation_config();
    if let Err(err) = reservation.validate() {
        tracing::error!(error = %err, "invalid reservation configuration");
        std::process::exit(1);
    }
    tracing::info!(
        lock_ttl_ms = config.lock_ttl_ms,
        max_lock_attempts = config.max_lock_attempts,
        backoff_base_ms = config.backoff_base_ms,
        deadline_ms = config.deadline_ms,
        "reservation configuration loaded"
    );

    // 4. Connect the coordination store and build the application
    let store = connect_store(&config).await;
    let state = api::create_state(store, &config);
    let app = api::create_app(state, metrics_handle);

    // 5. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("server shut down gracefully");
}

//! HTTP API exposing checkout reservations to the order service.
//!
//! The order service calls `POST /reservations` before persisting an order and
//! `POST /reservations/compensate` if persistence then fails. Stock levels are
//! administered through `/stock/{sku_id}`. Structured logging (tracing) and
//! Prometheus metrics are wired in here.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use coordination_store::CoordinationStore;
use metrics_exporter_prometheus::PrometheusHandle;
use reservation::{ReservationConfig, ReservationCoordinator};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Coordination store chosen at startup (PostgreSQL or in-memory).
pub type SharedStore = Arc<dyn CoordinationStore>;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub coordinator: ReservationCoordinator<SharedStore>,
    pub reservation: ReservationConfig,
    pub deadline: Duration,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/reservations", post(routes::reservations::reserve))
        .route(
            "/reservations/compensate",
            post(routes::reservations::compensate),
        )
        .route(
            "/stock/{sku_id}",
            get(routes::stock::get).put(routes::stock::set),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state over `store` with the configured lock budget.
pub fn create_state(store: SharedStore, config: &Config) -> Arc<AppState> {
    Arc::new(AppState {
        coordinator: ReservationCoordinator::new(store),
        reservation: config.reservation_config(),
        deadline: config.deadline(),
    })
}

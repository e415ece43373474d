//! Prometheus metrics endpoint and metric descriptions.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics::{Unit, describe_counter, describe_histogram};
use metrics_exporter_prometheus::PrometheusHandle;

/// GET /metrics — returns Prometheus-formatted metrics.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
}

/// Registers help text for the reservation metrics with the installed recorder.
pub fn describe() {
    describe_counter!(
        "lock_acquire_attempts_total",
        "Set-if-absent attempts made while acquiring SKU locks"
    );
    describe_counter!("lock_acquired_total", "SKU locks acquired");
    describe_counter!(
        "lock_timeouts_total",
        "SKU lock acquisitions that exhausted their attempt budget"
    );
    describe_counter!(
        "lock_fencing_violations_total",
        "Locks found expired or reassigned while still in use"
    );
    describe_counter!("stock_reservations_total", "Applied stock decrements");
    describe_counter!(
        "stock_insufficient_total",
        "Stock decrements rejected for insufficient quantity"
    );
    describe_counter!("checkout_reservations_total", "Checkout reservations started");
    describe_counter!("checkout_committed_total", "Checkout reservations committed");
    describe_counter!(
        "checkout_failed_total",
        "Checkout reservations that failed, by error kind"
    );
    describe_counter!(
        "checkout_rollbacks_total",
        "Failed checkouts that reversed applied decrements"
    );
    describe_counter!(
        "checkout_compensations_total",
        "Committed reservations handed back after failed order persistence"
    );
    describe_counter!(
        "checkout_deadline_exceeded_total",
        "Checkouts abandoned at their overall deadline"
    );
    describe_histogram!(
        "checkout_duration_seconds",
        Unit::Seconds,
        "Time spent reserving stock for one checkout"
    );
}

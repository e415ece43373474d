//! Checkout reservation endpoints called by the order service.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use reservation::{CheckoutReservation, Compensation, LineItem};
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct ReserveRequest {
    pub items: Vec<LineItem>,
}

#[derive(Deserialize)]
pub struct CompensateRequest {
    pub attempt_id: Uuid,
    pub items: Vec<LineItem>,
}

// -- Handlers --

/// POST /reservations — reserve stock for every line of a checkout, or none.
#[tracing::instrument(skip_all, fields(line_count = req.items.len()))]
pub async fn reserve(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReserveRequest>,
) -> Result<(StatusCode, Json<CheckoutReservation>), ApiError> {
    let reservation = state
        .coordinator
        .reserve_for_checkout_within(req.items, state.reservation, state.deadline)
        .await?;

    Ok((StatusCode::CREATED, Json(reservation)))
}

/// POST /reservations/compensate — return stock of a reservation whose order
/// could not be persisted. Retrying with the same `attempt_id` is harmless.
#[tracing::instrument(
    skip_all,
    fields(attempt_id = %req.attempt_id, line_count = req.items.len())
)]
pub async fn compensate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CompensateRequest>,
) -> Result<Json<Compensation>, ApiError> {
    let compensation = state
        .coordinator
        .compensate(req.attempt_id, &req.items)
        .await?;
    Ok(Json(compensation))
}

//! Stock administration endpoints (seeding and restocking).

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::SkuId;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct SetStockRequest {
    pub quantity: i64,
}

#[derive(Serialize)]
pub struct StockResponse {
    pub sku_id: SkuId,
    pub available: i64,
}

/// GET /stock/{sku_id} — current available quantity.
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(sku_id): Path<String>,
) -> Result<Json<StockResponse>, ApiError> {
    let sku_id = SkuId::new(sku_id);
    let available = state
        .coordinator
        .ledger()
        .available(&sku_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("SKU {sku_id} has never been stocked")))?;

    Ok(Json(StockResponse { sku_id, available }))
}

/// PUT /stock/{sku_id} — overwrite the available quantity under the SKU's lock.
#[tracing::instrument(skip(state, req))]
pub async fn set(
    State(state): State<Arc<AppState>>,
    Path(sku_id): Path<String>,
    Json(req): Json<SetStockRequest>,
) -> Result<Json<StockResponse>, ApiError> {
    let sku_id = SkuId::new(sku_id);
    state
        .coordinator
        .set_stock(&sku_id, req.quantity, &state.reservation)
        .await?;

    Ok(Json(StockResponse {
        sku_id,
        available: req.quantity,
    }))
}

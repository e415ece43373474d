//! API error types with HTTP response mapping.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use reservation::ReservationError;
use thiserror::Error;

const RETRY_AFTER_SECS: u64 = 1;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("{0}")]
    NotFound(String),
    /// Reservation outcome other than success.
    #[error(transparent)]
    Reservation(#[from] ReservationError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Reservation(err) => reservation_status(err),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::Reservation(err) => err.kind(),
        }
    }

    /// Seconds a client should wait before retrying, for transient failures.
    fn retry_after(&self) -> Option<u64> {
        match self {
            ApiError::Reservation(err) if err.is_retryable() => Some(RETRY_AFTER_SECS),
            _ => None,
        }
    }
}

fn reservation_status(err: &ReservationError) -> StatusCode {
    match err {
        ReservationError::InsufficientStock { .. } | ReservationError::LockTimeout { .. } => {
            StatusCode::CONFLICT
        }
        ReservationError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ReservationError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
        ReservationError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let sku_id = match &self {
            ApiError::Reservation(err) => err.sku_id().map(|sku| sku.as_str().to_string()),
            _ => None,
        };

        if status.is_server_error() {
            tracing::error!(%status, kind, error = %self, "request failed");
        }

        let body = serde_json::json!({
            "error": self.to_string(),
            "kind": kind,
            "sku_id": sku_id,
        });
        let mut response = (status, axum::Json(body)).into_response();
        if let Some(secs) = self.retry_after() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

//! Reservation error types.

use std::time::Duration;

use common::{OwnerToken, SkuId};
use coordination_store::StoreError;
use thiserror::Error;

use crate::state::ReservationState;

/// Errors that can occur while reserving stock.
#[derive(Debug, Error)]
pub enum ReservationError {
    /// Mutual exclusion could not be obtained within the attempt budget.
    /// The whole checkout may be retried later.
    #[error("Could not lock SKU {sku_id} after {attempts} attempts")]
    LockTimeout { sku_id: SkuId, attempts: u32 },

    /// The SKU does not hold enough stock for the requested quantity.
    #[error("Insufficient stock for SKU {sku_id}: requested {requested}, available {available}")]
    InsufficientStock {
        sku_id: SkuId,
        requested: u32,
        available: i64,
    },

    /// Transient coordination store fault.
    #[error("Coordination store unavailable: {0}")]
    StoreUnavailable(String),

    /// The lock guarding a critical section is no longer held by its token.
    #[error("Fencing violation on SKU {sku_id}: token {owner_token} no longer holds the lock")]
    FencingViolation {
        sku_id: SkuId,
        owner_token: OwnerToken,
    },

    /// The request or its configuration was rejected before touching the store.
    #[error("Invalid reservation request: {0}")]
    InvalidRequest(String),

    /// The caller's overall deadline elapsed before the attempt finished.
    #[error("Reservation did not finish within {0:?}")]
    DeadlineExceeded(Duration),

    /// Restoring stock for a previously committed reservation stopped part way.
    #[error("Compensation stopped at SKU {failed_sku}: {reason}")]
    CompensationIncomplete {
        failed_sku: SkuId,
        restored: Vec<SkuId>,
        reason: String,
    },

    /// An attempt tried to move through an illegal state transition.
    #[error("Invalid reservation state transition from {from} to {to}")]
    InvalidState {
        from: ReservationState,
        to: ReservationState,
    },

    /// Non-transient store error.
    #[error("Store error: {0}")]
    Store(#[source] StoreError),

    /// The background task running an attempt panicked or was aborted.
    #[error("Reservation task failed: {0}")]
    Internal(String),
}

impl ReservationError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ReservationError::LockTimeout { .. } => "lock_timeout",
            ReservationError::InsufficientStock { .. } => "insufficient_stock",
            ReservationError::StoreUnavailable(_) => "store_unavailable",
            ReservationError::FencingViolation { .. } => "fencing_violation",
            ReservationError::InvalidRequest(_) => "invalid_request",
            ReservationError::DeadlineExceeded(_) => "deadline_exceeded",
            ReservationError::CompensationIncomplete { .. } => "compensation_incomplete",
            ReservationError::InvalidState { .. } => "invalid_state",
            ReservationError::Store(_) => "store_error",
            ReservationError::Internal(_) => "internal",
        }
    }

    /// The SKU the error is about, when there is one.
    pub fn sku_id(&self) -> Option<&SkuId> {
        match self {
            ReservationError::LockTimeout { sku_id, .. }
            | ReservationError::InsufficientStock { sku_id, .. }
            | ReservationError::FencingViolation { sku_id, .. } => Some(sku_id),
            ReservationError::CompensationIncomplete { failed_sku, .. } => Some(failed_sku),
            _ => None,
        }
    }

    /// Returns true if retrying the whole checkout later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReservationError::LockTimeout { .. }
                | ReservationError::StoreUnavailable(_)
                | ReservationError::DeadlineExceeded(_)
                | ReservationError::FencingViolation { .. }
        )
    }
}

impl From<StoreError> for ReservationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => ReservationError::StoreUnavailable(reason),
            other => ReservationError::Store(other),
        }
    }
}

/// Convenience type alias for reservation results.
pub type Result<T> = std::result::Result<T, ReservationError>;

//! Line items and the per-checkout attempt record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{OwnerToken, SkuId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ReservationError, Result};
use crate::state::ReservationState;

/// A requested quantity of one SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub sku_id: SkuId,
    pub quantity: u32,
}

impl LineItem {
    /// Creates a line item.
    pub fn new(sku_id: impl Into<SkuId>, quantity: u32) -> Self {
        Self {
            sku_id: sku_id.into(),
            quantity,
        }
    }
}

/// One committed decrement, as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedLine {
    pub sku_id: SkuId,
    /// Units taken from stock.
    pub quantity: u32,
    /// Available quantity right after this decrement.
    pub new_quantity: i64,
}

/// Result of a successful checkout reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutReservation {
    pub attempt_id: Uuid,
    /// Applied decrements in canonical SKU order.
    pub lines: Vec<ReservedLine>,
    pub committed_at: DateTime<Utc>,
}

impl CheckoutReservation {
    /// The reserved quantities as line items, e.g. for [`compensate`].
    ///
    /// [`compensate`]: crate::ReservationCoordinator::compensate
    pub fn line_items(&self) -> Vec<LineItem> {
        self.lines
            .iter()
            .map(|line| LineItem::new(line.sku_id.clone(), line.quantity))
            .collect()
    }
}

/// Result of compensating a committed reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compensation {
    pub attempt_id: Uuid,
    /// Lines whose stock this call restored.
    pub restored: Vec<ReservedLine>,
    /// Lines an earlier compensation of the same attempt already restored.
    pub already_compensated: Vec<SkuId>,
}

/// Attempt-local bookkeeping for one distinct SKU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationLine {
    pub sku_id: SkuId,
    pub quantity: u32,
    pub lock_owner_token: Option<OwnerToken>,
    pub decrement_applied: bool,
    pub new_quantity: Option<i64>,
}

/// Transient record of one checkout attempt; never persisted.
///
/// Lines are deduplicated by SKU (quantities summed) and kept in ascending SKU
/// order, which is also the lock acquisition order.
#[derive(Debug, Clone)]
pub struct ReservationAttempt {
    id: Uuid,
    state: ReservationState,
    lines: Vec<ReservationLine>,
}

impl ReservationAttempt {
    /// Validates and normalizes the requested items.
    pub fn new(items: &[LineItem]) -> Result<Self> {
        if items.is_empty() {
            return Err(ReservationError::InvalidRequest(
                "at least one line item is required".to_string(),
            ));
        }

        let mut merged: BTreeMap<SkuId, u32> = BTreeMap::new();
        for item in items {
            if item.sku_id.is_blank() {
                return Err(ReservationError::InvalidRequest(
                    "sku_id must not be empty".to_string(),
                ));
            }
            if item.quantity == 0 {
                return Err(ReservationError::InvalidRequest(format!(
                    "quantity for {} must be at least 1",
                    item.sku_id
                )));
            }
            let total = merged.entry(item.sku_id.clone()).or_insert(0);
            *total = total.checked_add(item.quantity).ok_or_else(|| {
                ReservationError::InvalidRequest(format!(
                    "total quantity for {} overflows",
                    item.sku_id
                ))
            })?;
        }

        let lines = merged
            .into_iter()
            .map(|(sku_id, quantity)| ReservationLine {
                sku_id,
                quantity,
                lock_owner_token: None,
                decrement_applied: false,
                new_quantity: None,
            })
            .collect();

        Ok(Self {
            id: Uuid::new_v4(),
            state: ReservationState::Pending,
            lines,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ReservationState {
        self.state
    }

    /// Lines in canonical (ascending SKU) order.
    pub fn lines(&self) -> &[ReservationLine] {
        &self.lines
    }

    /// Moves to `next`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, next: ReservationState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ReservationError::InvalidState {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(attempt_id = %self.id, from = %self.state, to = %next, "attempt transition");
        self.state = next;
        Ok(())
    }

    pub(crate) fn record_lock(&mut self, index: usize, token: OwnerToken) {
        self.lines[index].lock_owner_token = Some(token);
    }

    pub(crate) fn record_decrement(&mut self, index: usize, new_quantity: i64) {
        let line = &mut self.lines[index];
        line.decrement_applied = true;
        line.new_quantity = Some(new_quantity);
    }

    pub(crate) fn clear_decrement(&mut self, index: usize) {
        let line = &mut self.lines[index];
        line.decrement_applied = false;
        line.new_quantity = None;
    }

    pub(crate) fn take_lock(&mut self, index: usize) -> Option<OwnerToken> {
        self.lines[index].lock_owner_token.take()
    }

    /// Converts a fully applied attempt into the caller-facing result.
    pub(crate) fn to_reservation(&self) -> CheckoutReservation {
        CheckoutReservation {
            attempt_id: self.id,
            lines: self
                .lines
                .iter()
                .map(|line| ReservedLine {
                    sku_id: line.sku_id.clone(),
                    quantity: line.quantity,
                    new_quantity: line.new_quantity.unwrap_or_default(),
                })
                .collect(),
            committed_at: Utc::now(),
        }
    }
}

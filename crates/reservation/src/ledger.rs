//! Available-quantity ledger per SKU.

use std::time::Duration;

use common::{OwnerToken, SkuId};
use coordination_store::{CoordinationStore, DecrementOutcome};

use crate::error::{ReservationError, Result};

/// Reads and conditionally mutates each SKU's available quantity.
///
/// Quantities live at `stock:<sku_id>` and change only through the store's
/// atomic decrement-if-sufficient and increment. A SKU that was never stocked
/// has zero available.
#[derive(Debug, Clone)]
pub struct StockLedger<S> {
    store: S,
}

impl<S: CoordinationStore> StockLedger<S> {
    /// Creates a ledger over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Decrements the available quantity by `quantity`.
    ///
    /// Callers must hold the SKU's lock. Returns the quantity left after the
    /// decrement, or `InsufficientStock` with nothing changed.
    #[tracing::instrument(skip_all, fields(sku_id = %sku_id, quantity = quantity))]
    pub async fn reserve(&self, sku_id: &SkuId, quantity: u32) -> Result<i64> {
        let amount = positive_amount(quantity)?;

        match self
            .store
            .decrement_if_sufficient(&sku_id.stock_key(), amount)
            .await?
        {
            DecrementOutcome::Applied(remaining) => {
                metrics::counter!("stock_reservations_total").increment(1);
                tracing::debug!(remaining, "stock reserved");
                Ok(remaining)
            }
            DecrementOutcome::Insufficient(available) => {
                metrics::counter!("stock_insufficient_total").increment(1);
                tracing::info!(available, "insufficient stock");
                Err(ReservationError::InsufficientStock {
                    sku_id: sku_id.clone(),
                    requested: quantity,
                    available,
                })
            }
        }
    }

    /// Adds `quantity` back to the SKU. Compensates an earlier `reserve`.
    #[tracing::instrument(skip_all, fields(sku_id = %sku_id, quantity = quantity))]
    pub async fn release(&self, sku_id: &SkuId, quantity: u32) -> Result<i64> {
        let amount = positive_amount(quantity)?;
        let restored = self.store.increment(&sku_id.stock_key(), amount).await?;
        tracing::debug!(restored, "stock released");
        Ok(restored)
    }

    /// Adds `quantity` back at most once per `claim_key`.
    ///
    /// The claim is taken with set-if-absent before the increment and
    /// withdrawn if the increment fails, so a retry can still restore the
    /// line. Returns None when an earlier call already holds the claim.
    #[tracing::instrument(
        skip_all,
        fields(sku_id = %sku_id, quantity = quantity, claim_key = claim_key)
    )]
    pub async fn release_once(
        &self,
        claim_key: &str,
        sku_id: &SkuId,
        quantity: u32,
        claim_ttl: Duration,
    ) -> Result<Option<i64>> {
        positive_amount(quantity)?;
        let claim = OwnerToken::new().to_string();
        if !self
            .store
            .set_if_absent(claim_key, &claim, claim_ttl)
            .await?
        {
            tracing::info!("stock already restored under this claim");
            return Ok(None);
        }

        match self.release(sku_id, quantity).await {
            Ok(restored) => Ok(Some(restored)),
            Err(err) => {
                let withdrawn = self.store.compare_and_delete(claim_key, &claim).await;
                if let Err(withdraw_err) = withdrawn {
                    tracing::error!(
                        error = %withdraw_err,
                        "could not withdraw compensation claim; line stays unrestored"
                    );
                }
                Err(err)
            }
        }
    }

    /// Current available quantity, or None if the SKU was never stocked.
    pub async fn available(&self, sku_id: &SkuId) -> Result<Option<i64>> {
        Ok(self.store.get_counter(&sku_id.stock_key()).await?)
    }

    /// Sets the available quantity outright (seeding and restocking).
    ///
    /// Callers must hold the SKU's lock once checkouts may be running; see
    /// [`crate::ReservationCoordinator::set_stock`].
    #[tracing::instrument(skip_all, fields(sku_id = %sku_id, quantity = quantity))]
    pub async fn set_stock(&self, sku_id: &SkuId, quantity: i64) -> Result<()> {
        if sku_id.is_blank() {
            return Err(ReservationError::InvalidRequest(
                "sku_id must not be empty".to_string(),
            ));
        }
        if quantity < 0 {
            return Err(ReservationError::InvalidRequest(format!(
                "stock for {sku_id} cannot be negative"
            )));
        }
        self.store
            .set_counter(&sku_id.stock_key(), quantity)
            .await?;
        tracing::info!(quantity, "stock level set");
        Ok(())
    }
}

fn positive_amount(quantity: u32) -> Result<i64> {
    if quantity == 0 {
        return Err(ReservationError::InvalidRequest(
            "quantity must be at least 1".to_string(),
        ));
    }
    Ok(i64::from(quantity))
}

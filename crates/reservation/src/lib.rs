//! Inventory reservation under per-SKU mutual exclusion.
//!
//! A checkout reserves stock for several SKUs at once:
//! 1. Lock every distinct SKU in ascending order
//! 2. Conditionally decrement each SKU's available quantity
//! 3. Release every lock
//!
//! If any line cannot be reserved, decrements already applied are reversed
//! before the locks are released. Locks are fenced by a per-acquisition owner
//! token, so a holder whose lock expired can never release its successor's.

pub mod attempt;
pub mod backoff;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod state;

pub use attempt::{
    CheckoutReservation, Compensation, LineItem, ReservationAttempt, ReservationLine, ReservedLine,
};
pub use backoff::{BackoffPolicy, RetryOutcome, retry_with_backoff};
pub use config::ReservationConfig;
pub use coordinator::ReservationCoordinator;
pub use error::{ReservationError, Result};
pub use ledger::StockLedger;
pub use lock::LockManager;
pub use state::ReservationState;

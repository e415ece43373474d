//! Shared identifier types for the inventory reservation workspace.

pub mod types;

pub use types::{
    COMPENSATION_KEY_PREFIX, LOCK_KEY_PREFIX, OwnerToken, STOCK_KEY_PREFIX, SkuId,
};

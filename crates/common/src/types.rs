use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Key prefix for per-SKU mutual-exclusion locks.
pub const LOCK_KEY_PREFIX: &str = "lock:";

/// Key prefix for per-SKU available-quantity counters.
pub const STOCK_KEY_PREFIX: &str = "stock:";

/// Key prefix for the once-only claims recorded when a committed reservation
/// line is compensated.
pub const COMPENSATION_KEY_PREFIX: &str = "compensated:";

/// Stock-keeping unit identifier.
///
/// Ordering is lexicographic on the underlying string; the reservation
/// coordinator relies on it as the canonical lock acquisition order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkuId(String);

impl SkuId {
    /// Creates a SKU identifier from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the SKU identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identifier is empty or only whitespace.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Returns the coordination store key guarding this SKU.
    pub fn lock_key(&self) -> String {
        format!("{LOCK_KEY_PREFIX}{}", self.0)
    }

    /// Returns the coordination store key holding this SKU's quantity.
    pub fn stock_key(&self) -> String {
        format!("{STOCK_KEY_PREFIX}{}", self.0)
    }

    /// Returns the key claimed when compensating this SKU's line of the
    /// reservation `attempt_id`.
    pub fn compensation_key(&self, attempt_id: Uuid) -> String {
        format!("{COMPENSATION_KEY_PREFIX}{attempt_id}:{}", self.0)
    }
}

impl std::fmt::Display for SkuId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SkuId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SkuId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SkuId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Opaque token identifying a single lock acquisition.
///
/// A fresh token is minted for every acquisition attempt and is the only
/// credential accepted when releasing that lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerToken(Uuid);

impl OwnerToken {
    /// Creates a new random owner token.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

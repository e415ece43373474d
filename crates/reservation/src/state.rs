//! Reservation attempt state machine.

use serde::{Deserialize, Serialize};

/// The state of one checkout reservation attempt.
///
/// State transitions:
/// ```text
/// Pending ──► Locked ──► Validated ──► Committed
///    │           │
///    │           └──► Failed ──► RolledBack ──► Released
///    └──────────────► Failed ─────────────────► Released
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ReservationState {
    /// Request accepted, no lock held yet.
    #[default]
    Pending,

    /// Every distinct SKU lock is held.
    Locked,

    /// Every line was decremented successfully.
    Validated,

    /// Locks released after a fully successful attempt (terminal state).
    Committed,

    /// A lock or a line could not be obtained.
    Failed,

    /// Applied decrements have been reversed.
    RolledBack,

    /// Locks released after a failure (terminal state).
    Released,
}

impl ReservationState {
    /// Returns true if moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: ReservationState) -> bool {
        use ReservationState::*;
        matches!(
            (*self, next),
            (Pending, Locked)
                | (Pending, Failed)
                | (Locked, Validated)
                | (Locked, Failed)
                | (Validated, Committed)
                | (Failed, RolledBack)
                | (Failed, Released)
                | (RolledBack, Released)
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationState::Committed | ReservationState::Released
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationState::Pending => "Pending",
            ReservationState::Locked => "Locked",
            ReservationState::Validated => "Validated",
            ReservationState::Committed => "Committed",
            ReservationState::Failed => "Failed",
            ReservationState::RolledBack => "RolledBack",
            ReservationState::Released => "Released",
        }
    }
}

impl std::fmt::Display for ReservationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_pending() {
        assert_eq!(ReservationState::default(), ReservationState::Pending);
    }

    #[test]
    fn test_success_path() {
        assert!(ReservationState::Pending.can_transition_to(ReservationState::Locked));
        assert!(ReservationState::Locked.can_transition_to(ReservationState::Validated));
        assert!(ReservationState::Validated.can_transition_to(ReservationState::Committed));
    }

    #[test]
    fn test_failure_paths() {
        assert!(ReservationState::Pending.can_transition_to(ReservationState::Failed));
        assert!(ReservationState::Locked.can_transition_to(ReservationState::Failed));
        assert!(ReservationState::Failed.can_transition_to(ReservationState::RolledBack));
        assert!(ReservationState::RolledBack.can_transition_to(ReservationState::Released));
        assert!(ReservationState::Failed.can_transition_to(ReservationState::Released));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!ReservationState::Pending.can_transition_to(ReservationState::Validated));
        assert!(!ReservationState::Validated.can_transition_to(ReservationState::Failed));
        assert!(!ReservationState::Committed.can_transition_to(ReservationState::Released));
        assert!(!ReservationState::Released.can_transition_to(ReservationState::Pending));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ReservationState::Pending.is_terminal());
        assert!(!ReservationState::Locked.is_terminal());
        assert!(!ReservationState::Validated.is_terminal());
        assert!(ReservationState::Committed.is_terminal());
        assert!(!ReservationState::Failed.is_terminal());
        assert!(!ReservationState::RolledBack.is_terminal());
        assert!(ReservationState::Released.is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(ReservationState::RolledBack.to_string(), "RolledBack");
        assert_eq!(ReservationState::Committed.to_string(), "Committed");
    }
}

// ============================================================================
// Entity Lifecycle State
// ============================================================================
//
// State transitions:
//
//   NeverTracked ──schedule insert──> Queued ──commit──> Registered
//                                                          │
//                    Unregistered <──detach/deregister─────┤
//                                                          │
//                    Dequeued <──────committed delete──────┘
//
// Unregistered and Dequeued only leave through a fresh register() or a
// fresh insertion schedule.
// ============================================================================

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EntityState {
    /// Never seen by the registry
    #[default]
    NeverTracked,

    /// Scheduled for insertion, not yet committed
    Queued,

    /// Persisted at least once and currently tracked
    Registered,

    /// Explicitly detached
    Unregistered,

    /// Deleted by a successful commit
    Dequeued,
}

impl EntityState {
    /// Check if the registry currently tracks the entity
    pub fn is_tracked(&self) -> bool {
        matches!(self, EntityState::Queued | EntityState::Registered)
    }

    /// Check if the entity left tracking for good
    pub fn is_terminal(&self) -> bool {
        matches!(self, EntityState::Unregistered | EntityState::Dequeued)
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityState::NeverTracked => write!(f, "NEVER_TRACKED"),
            EntityState::Queued => write!(f, "QUEUED"),
            EntityState::Registered => write!(f, "REGISTERED"),
            EntityState::Unregistered => write!(f, "UNREGISTERED"),
            EntityState::Dequeued => write!(f, "DEQUEUED"),
        }
    }
}

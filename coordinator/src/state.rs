//! Coordinator state definitions.

use std::fmt;

/// Lifecycle of a single transaction's coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordinatorState {
    /// Participant list not yet received.
    CollectingParticipants,
    /// Participant list known, waiting for unanimous commit or any abort.
    CollectingVotes,
    /// Decision fixed, decision being delivered to participants.
    Deciding,
    /// Every participant that had to be told has acknowledged.
    Done,
}

impl CoordinatorState {
    /// Check if the coordinator is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CoordinatorState::Done)
    }
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoordinatorState::CollectingParticipants => "collecting-participants",
            CoordinatorState::CollectingVotes => "collecting-votes",
            CoordinatorState::Deciding => "deciding",
            CoordinatorState::Done => "done",
        };
        f.write_str(name)
    }
}

//! Time utilities: commit timestamps, deadlines and protocol constants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Protocol timing constants.
pub mod constants {
    use std::time::Duration;

    /// Commit deadline applied when the creator does not supply one (60 seconds).
    pub fn default_commit_timeout() -> Duration {
        Duration::from_secs(60)
    }

    /// First delay before a retryable command is re-sent (100 milliseconds).
    pub fn initial_retry_backoff() -> Duration {
        Duration::from_millis(100)
    }

    /// Upper bound on the retry delay (5 seconds).
    pub fn max_retry_backoff() -> Duration {
        Duration::from_secs(5)
    }

    /// Participant request timeout (10 seconds).
    pub fn request_timeout() -> Duration {
        Duration::from_secs(10)
    }
}

/// A wall-clock timestamp (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Logical cluster timestamp reported by a participant when it prepares.
///
/// Ordered by seconds, then by increment within the second.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CommitTimestamp {
    /// Seconds component.
    pub secs: u32,
    /// Ordinal within the second.
    pub inc: u32,
}

impl CommitTimestamp {
    /// The smallest timestamp.
    pub const MIN: CommitTimestamp = CommitTimestamp { secs: 0, inc: 0 };

    /// Create a new timestamp.
    pub const fn new(secs: u32, inc: u32) -> Self {
        Self { secs, inc }
    }
}

impl fmt::Display for CommitTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}, {})", self.secs, self.inc)
    }
}

/// Point in time after which an undecided transaction aborts itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitDeadline {
    /// The transaction never times out.
    Never,
    /// The transaction aborts at this instant if still undecided.
    At(Instant),
}

impl CommitDeadline {
    /// Deadline relative to now.
    pub fn after(duration: Duration) -> Self {
        match Instant::now().checked_add(duration) {
            Some(at) => CommitDeadline::At(at),
            None => CommitDeadline::Never,
        }
    }

    /// Check if the deadline has passed.
    pub fn is_expired(&self) -> bool {
        match self {
            CommitDeadline::Never => false,
            CommitDeadline::At(at) => Instant::now() >= *at,
        }
    }

    /// Get remaining duration, `None` if the deadline never fires.
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            CommitDeadline::Never => None,
            CommitDeadline::At(at) => Some(at.saturating_duration_since(Instant::now())),
        }
    }
}

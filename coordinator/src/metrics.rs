//! Metrics collection for coordinator monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::decision::CommitDecision;

/// Coordinator metrics.
pub struct Metrics {
    /// Coordinators created.
    pub coordinators_created: AtomicU64,
    /// Coordinators currently registered.
    pub coordinators_active: AtomicU64,
    /// Coordinators removed after reaching their terminal state.
    pub coordinators_removed: AtomicU64,
    /// Transactions decided commit.
    pub decisions_commit: AtomicU64,
    /// Transactions decided abort.
    pub decisions_abort: AtomicU64,
    /// Aborts forced by an elapsed commit deadline.
    pub deadline_aborts: AtomicU64,
    /// Commands handed to the participant client.
    pub commands_sent: AtomicU64,
    /// Commands acknowledged by participants.
    pub commands_acked: AtomicU64,
    /// Retryable delivery failures.
    pub retryable_failures: AtomicU64,
    /// Fatal delivery failures.
    pub fatal_failures: AtomicU64,
    /// Aborts sent for votes on unknown transactions.
    pub standalone_aborts: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            coordinators_created: AtomicU64::new(0),
            coordinators_active: AtomicU64::new(0),
            coordinators_removed: AtomicU64::new(0),
            decisions_commit: AtomicU64::new(0),
            decisions_abort: AtomicU64::new(0),
            deadline_aborts: AtomicU64::new(0),
            commands_sent: AtomicU64::new(0),
            commands_acked: AtomicU64::new(0),
            retryable_failures: AtomicU64::new(0),
            fatal_failures: AtomicU64::new(0),
            standalone_aborts: AtomicU64::new(0),
        }
    }

    /// Record a coordinator entering the registry.
    pub fn coordinator_created(&self) {
        self.coordinators_created.fetch_add(1, Ordering::Relaxed);
        self.coordinators_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a coordinator leaving the registry.
    pub fn coordinator_removed(&self) {
        self.coordinators_removed.fetch_add(1, Ordering::Relaxed);
        self.coordinators_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a fixed decision.
    pub fn decision(&self, decision: CommitDecision) {
        match decision {
            CommitDecision::Commit => self.decisions_commit.fetch_add(1, Ordering::Relaxed),
            CommitDecision::Abort => self.decisions_abort.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Record a deadline abort.
    pub fn deadline_abort(&self) {
        self.deadline_aborts.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment commands sent.
    pub fn command_sent(&self) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment commands acknowledged.
    pub fn command_acked(&self) {
        self.commands_acked.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment retryable failures.
    pub fn retryable_failure(&self) {
        self.retryable_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment fatal failures.
    pub fn fatal_failure(&self) {
        self.fatal_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment standalone aborts.
    pub fn standalone_abort(&self) {
        self.standalone_aborts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            coordinators_created: self.coordinators_created.load(Ordering::Relaxed),
            coordinators_active: self.coordinators_active.load(Ordering::Relaxed),
            coordinators_removed: self.coordinators_removed.load(Ordering::Relaxed),
            decisions_commit: self.decisions_commit.load(Ordering::Relaxed),
            decisions_abort: self.decisions_abort.load(Ordering::Relaxed),
            deadline_aborts: self.deadline_aborts.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            commands_acked: self.commands_acked.load(Ordering::Relaxed),
            retryable_failures: self.retryable_failures.load(Ordering::Relaxed),
            fatal_failures: self.fatal_failures.load(Ordering::Relaxed),
            standalone_aborts: self.standalone_aborts.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP txncoord_coordinators_created Total coordinators created
# TYPE txncoord_coordinators_created counter
txncoord_coordinators_created {}

# HELP txncoord_coordinators_active Current live coordinators
# TYPE txncoord_coordinators_active gauge
txncoord_coordinators_active {}

# HELP txncoord_coordinators_removed Total coordinators removed after completion
# TYPE txncoord_coordinators_removed counter
txncoord_coordinators_removed {}

# HELP txncoord_decisions_commit Total commit decisions
# TYPE txncoord_decisions_commit counter
txncoord_decisions_commit {}

# HELP txncoord_decisions_abort Total abort decisions
# TYPE txncoord_decisions_abort counter
txncoord_decisions_abort {}

# HELP txncoord_deadline_aborts Total aborts forced by commit deadline
# TYPE txncoord_deadline_aborts counter
txncoord_deadline_aborts {}

# HELP txncoord_commands_sent Total participant commands sent
# TYPE txncoord_commands_sent counter
txncoord_commands_sent {}

# HELP txncoord_commands_acked Total participant commands acknowledged
# TYPE txncoord_commands_acked counter
txncoord_commands_acked {}

# HELP txncoord_retryable_failures Total retryable delivery failures
# TYPE txncoord_retryable_failures counter
txncoord_retryable_failures {}

# HELP txncoord_fatal_failures Total fatal delivery failures
# TYPE txncoord_fatal_failures counter
txncoord_fatal_failures {}

# HELP txncoord_standalone_aborts Total aborts sent for unknown transactions
# TYPE txncoord_standalone_aborts counter
txncoord_standalone_aborts {}
"#,
            snapshot.coordinators_created,
            snapshot.coordinators_active,
            snapshot.coordinators_removed,
            snapshot.decisions_commit,
            snapshot.decisions_abort,
            snapshot.deadline_aborts,
            snapshot.commands_sent,
            snapshot.commands_acked,
            snapshot.retryable_failures,
            snapshot.fatal_failures,
            snapshot.standalone_aborts,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub coordinators_created: u64,
    pub coordinators_active: u64,
    pub coordinators_removed: u64,
    pub decisions_commit: u64,
    pub decisions_abort: u64,
    pub deadline_aborts: u64,
    pub commands_sent: u64,
    pub commands_acked: u64,
    pub retryable_failures: u64,
    pub fatal_failures: u64,
    pub standalone_aborts: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;

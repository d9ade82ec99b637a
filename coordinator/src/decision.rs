//! Commit decisions and the handles callers wait on.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::warn;

use txncoord_common::{CoordinatorError, Result};

/// Final outcome of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommitDecision {
    /// Every participant applies the transaction.
    Commit,
    /// Every participant rolls the transaction back.
    Abort,
}

impl fmt::Display for CommitDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitDecision::Commit => write!(f, "commit"),
            CommitDecision::Abort => write!(f, "abort"),
        }
    }
}

/// Single-assignment cell holding a transaction's decision.
///
/// Lives inside the coordinator's locked state; every [`DecisionHandle`]
/// handed out subscribes to the same cell.
#[derive(Debug)]
pub(crate) struct DecisionCell {
    tx: watch::Sender<Option<CommitDecision>>,
}

impl DecisionCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Fix the decision. Resolving again to the same value is a no-op;
    /// resolving to a different value is refused.
    pub(crate) fn resolve(&self, decision: CommitDecision) -> Result<()> {
        let mut conflict = None;
        self.tx.send_if_modified(|current| match current {
            None => {
                *current = Some(decision);
                true
            }
            Some(existing) => {
                if *existing != decision {
                    conflict = Some(*existing);
                }
                false
            }
        });

        match conflict {
            Some(existing) => Err(CoordinatorError::InvariantViolation(format!(
                "decision already fixed to {existing}, refusing {decision}"
            ))),
            None => Ok(()),
        }
    }

    pub(crate) fn get(&self) -> Option<CommitDecision> {
        *self.tx.borrow()
    }

    pub(crate) fn handle(&self) -> DecisionHandle {
        DecisionHandle {
            inner: HandleInner::Pending(self.tx.subscribe()),
        }
    }
}

#[derive(Debug, Clone)]
enum HandleInner {
    Ready(CommitDecision),
    Pending(watch::Receiver<Option<CommitDecision>>),
}

/// Caller-facing view of a transaction's eventual decision.
///
/// Every handle for the same transaction observes the same value.
#[derive(Debug, Clone)]
pub struct DecisionHandle {
    inner: HandleInner,
}

impl DecisionHandle {
    /// A handle that is already resolved.
    pub fn ready(decision: CommitDecision) -> Self {
        Self {
            inner: HandleInner::Ready(decision),
        }
    }

    /// Non-blocking readiness check.
    pub fn is_ready(&self) -> bool {
        self.try_get().is_some()
    }

    /// The decision if it has been fixed.
    pub fn try_get(&self) -> Option<CommitDecision> {
        match &self.inner {
            HandleInner::Ready(decision) => Some(*decision),
            HandleInner::Pending(rx) => *rx.borrow(),
        }
    }

    /// Wait for the decision.
    ///
    /// If the coordinator is torn down without deciding, the transaction is
    /// reported as aborted.
    pub async fn wait(&self) -> CommitDecision {
        match &self.inner {
            HandleInner::Ready(decision) => *decision,
            HandleInner::Pending(rx) => {
                let mut rx = rx.clone();
                let observed = rx.wait_for(Option::is_some).await.map(|d| *d);
                match observed {
                    Ok(decision) => decision.unwrap_or(CommitDecision::Abort),
                    Err(_) => {
                        warn!("Coordinator dropped before deciding, reporting abort");
                        CommitDecision::Abort
                    }
                }
            }
        }
    }

    /// Block the current thread until the decision is known.
    ///
    /// Must not be called from inside an async task.
    pub fn blocking_wait(&self) -> CommitDecision {
        futures::executor::block_on(self.wait())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[test]
    fn test_cell_resolves_once() {
        let cell = DecisionCell::new();
        assert_eq!(cell.get(), None);

        cell.resolve(CommitDecision::Commit).unwrap();
        cell.resolve(CommitDecision::Commit).unwrap();
        assert!(matches!(
            cell.resolve(CommitDecision::Abort),
            Err(CoordinatorError::InvariantViolation(_))
        ));
        assert_eq!(cell.get(), Some(CommitDecision::Commit));
    }

    #[test]
    fn test_handles_share_value() {
        let cell = DecisionCell::new();
        let first = cell.handle();
        let second = first.clone();
        assert!(!first.is_ready());

        cell.resolve(CommitDecision::Abort).unwrap();
        let late = cell.handle();

        assert_eq!(first.try_get(), Some(CommitDecision::Abort));
        assert_eq!(second.try_get(), Some(CommitDecision::Abort));
        assert_eq!(late.try_get(), Some(CommitDecision::Abort));
    }

    #[test]
    fn test_wait_pending_until_resolved() {
        let cell = DecisionCell::new();
        let handle = cell.handle();
        let mut wait = task::spawn(handle.wait());

        assert_pending!(wait.poll());
        cell.resolve(CommitDecision::Commit).unwrap();
        assert!(wait.is_woken());
        assert_ready_eq!(wait.poll(), CommitDecision::Commit);
    }

    #[test]
    fn test_dropped_cell_reports_abort() {
        let cell = DecisionCell::new();
        let handle = cell.handle();
        drop(cell);

        assert_eq!(handle.blocking_wait(), CommitDecision::Abort);
    }

    #[test]
    fn test_ready_handle() {
        let handle = DecisionHandle::ready(CommitDecision::Abort);
        assert!(handle.is_ready());
        assert_eq!(handle.blocking_wait(), CommitDecision::Abort);
    }
}

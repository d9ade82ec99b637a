//! Registry of live transaction coordinators.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use txncoord_common::{
    CommitDeadline, CoordinatorError, Result, SessionId, TransactionKey, TxnNumber,
};

use crate::transaction::TransactionCoordinator;

/// Result of a successful [`CoordinatorRegistry::create`].
#[derive(Debug)]
pub struct Created {
    /// The newly registered coordinator.
    pub coordinator: Arc<TransactionCoordinator>,
    /// Live coordinators of the same session with a lower transaction
    /// number. The caller aborts the ones that are still undecided.
    pub superseded: Vec<Arc<TransactionCoordinator>>,
}

/// Table of live coordinators, keyed by session then transaction number.
///
/// Never call into the registry while holding a coordinator's lock.
#[derive(Debug, Default)]
pub struct CoordinatorRegistry {
    sessions: DashMap<SessionId, BTreeMap<TxnNumber, Arc<TransactionCoordinator>>>,
}

impl CoordinatorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new coordinator for `key`.
    ///
    /// Fails if a coordinator for the same key is live, or if the session
    /// already has a live coordinator with a higher transaction number.
    pub fn create(&self, key: TransactionKey, deadline: CommitDeadline) -> Result<Created> {
        let mut session = self.sessions.entry(key.session_id).or_default();

        if session.contains_key(&key.txn_number) {
            warn!(
                lsid = %key.session_id,
                txn_number = %key.txn_number,
                "Coordinator already exists"
            );
            return Err(CoordinatorError::CoordinatorExists(key));
        }

        if let Some((&active, _)) = session.last_key_value() {
            if active > key.txn_number {
                warn!(
                    lsid = %key.session_id,
                    txn_number = %key.txn_number,
                    active = %active,
                    "Refusing coordinator for stale transaction"
                );
                return Err(CoordinatorError::StaleTransaction { key, active });
            }
        }

        let superseded: Vec<Arc<TransactionCoordinator>> = session.values().cloned().collect();
        let coordinator = Arc::new(TransactionCoordinator::new(key, deadline));
        session.insert(key.txn_number, coordinator.clone());

        debug!(
            lsid = %key.session_id,
            txn_number = %key.txn_number,
            superseded = superseded.len(),
            "Coordinator registered"
        );

        Ok(Created {
            coordinator,
            superseded,
        })
    }

    /// Get the live coordinator for `key`.
    pub fn lookup(&self, key: &TransactionKey) -> Option<Arc<TransactionCoordinator>> {
        self.sessions
            .get(&key.session_id)
            .and_then(|session| session.get(&key.txn_number).cloned())
    }

    /// Remove the coordinator for `key`, if any.
    pub fn remove(&self, key: &TransactionKey) -> Option<Arc<TransactionCoordinator>> {
        let removed = self
            .sessions
            .get_mut(&key.session_id)
            .and_then(|mut session| session.remove(&key.txn_number));
        self.prune(&key.session_id);
        removed
    }

    /// Remove `coordinator` only if it is still the one registered under
    /// its key.
    pub fn remove_if_same(&self, coordinator: &Arc<TransactionCoordinator>) -> bool {
        let key = *coordinator.key();
        let removed = self
            .sessions
            .get_mut(&key.session_id)
            .map_or(false, |mut session| match session.get(&key.txn_number) {
                Some(live) if Arc::ptr_eq(live, coordinator) => {
                    session.remove(&key.txn_number);
                    true
                }
                _ => false,
            });
        if removed {
            self.prune(&key.session_id);
        }
        removed
    }

    /// Keys of every live coordinator, ordered.
    pub fn keys(&self) -> Vec<TransactionKey> {
        let mut keys: Vec<TransactionKey> = self
            .sessions
            .iter()
            .flat_map(|entry| {
                let session_id = *entry.key();
                entry
                    .value()
                    .keys()
                    .map(move |txn_number| TransactionKey::new(session_id, *txn_number))
                    .collect::<Vec<_>>()
            })
            .collect();
        keys.sort();
        keys
    }

    /// Number of live coordinators.
    pub fn len(&self) -> usize {
        self.sessions.iter().map(|entry| entry.value().len()).sum()
    }

    /// Check if no coordinator is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune(&self, session_id: &SessionId) {
        self.sessions.remove_if(session_id, |_, session| session.is_empty());
    }
}

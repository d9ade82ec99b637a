//! Transaction coordinator service.
//!
//! Entry point for the public operations. Every operation looks the
//! coordinator up in the registry, runs one state machine step under the
//! coordinator's lock and hands the resulting commands to the disseminator.
//! None of them wait on a participant.
//!
//! Operations spawn tasks and must be called from within a tokio runtime.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use txncoord_common::{
    CommitDeadline, CommitTimestamp, CoordinatorError, ParticipantId, Result, TransactionKey,
};
use txncoord_participant::ParticipantClient;

use crate::config::CoordinatorConfig;
use crate::decision::{CommitDecision, DecisionHandle};
use crate::disseminator::{DecisionDisseminator, FaultReport};
use crate::metrics::{Metrics, MetricsSnapshot, SharedMetrics};
use crate::registry::CoordinatorRegistry;
use crate::state::CoordinatorState;
use crate::transaction::{AbortReason, TransactionCoordinator};

/// Process-wide commit coordination service.
pub struct TransactionCoordinatorService {
    /// Configuration.
    config: CoordinatorConfig,
    /// Live coordinators.
    registry: Arc<CoordinatorRegistry>,
    /// Outbound command delivery.
    disseminator: DecisionDisseminator,
    /// Counters.
    metrics: SharedMetrics,
    /// Fatal delivery failures, until someone takes the receiver.
    fault_rx: Mutex<Option<mpsc::UnboundedReceiver<FaultReport>>>,
}

impl TransactionCoordinatorService {
    /// Create a service with its own registry.
    pub fn new(config: CoordinatorConfig, client: Arc<dyn ParticipantClient>) -> Self {
        Self::with_registry(config, client, Arc::new(CoordinatorRegistry::new()))
    }

    /// Create a service over an existing registry.
    pub fn with_registry(
        config: CoordinatorConfig,
        client: Arc<dyn ParticipantClient>,
        registry: Arc<CoordinatorRegistry>,
    ) -> Self {
        let metrics: SharedMetrics = Arc::new(Metrics::new());
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        let disseminator = DecisionDisseminator::new(
            client,
            registry.clone(),
            config.retry.clone(),
            metrics.clone(),
            fault_tx,
        );

        Self {
            config,
            registry,
            disseminator,
            metrics,
            fault_rx: Mutex::new(Some(fault_rx)),
        }
    }

    /// Deadline derived from the configured default commit timeout.
    pub fn default_deadline(&self) -> CommitDeadline {
        CommitDeadline::after(self.config.default_commit_timeout)
    }

    /// Create the coordinator for `key`.
    ///
    /// Undecided coordinators of the same session with lower transaction
    /// numbers are aborted.
    #[instrument(skip_all, fields(lsid = %key.session_id, txn_number = %key.txn_number), err)]
    pub fn create_coordinator(&self, key: TransactionKey, deadline: CommitDeadline) -> Result<()> {
        let created = self.registry.create(key, deadline)?;
        self.metrics.coordinator_created();
        info!(deadline = ?deadline.remaining(), "Coordinator created");

        for older in &created.superseded {
            let transition = older.abort_undecided(AbortReason::Superseded);
            self.disseminator.apply(older, transition);
        }

        self.arm_deadline(&created.coordinator);
        Ok(())
    }

    /// Supply the participant list and get a handle on the decision.
    ///
    /// An unknown transaction is reported as aborted.
    #[instrument(skip_all, fields(lsid = %key.session_id, txn_number = %key.txn_number))]
    pub fn register_participants(
        &self,
        key: TransactionKey,
        participants: impl IntoIterator<Item = ParticipantId>,
    ) -> DecisionHandle {
        let Some(coordinator) = self.registry.lookup(&key) else {
            debug!("No coordinator for transaction, reporting abort");
            return DecisionHandle::ready(CommitDecision::Abort);
        };

        let participants: BTreeSet<ParticipantId> = participants.into_iter().collect();
        let (handle, transition) = coordinator.register_participants(participants);
        self.disseminator.apply(&coordinator, transition);
        handle
    }

    /// Same as [`register_participants`](Self::register_participants).
    pub fn coordinate_commit(
        &self,
        key: TransactionKey,
        participants: impl IntoIterator<Item = ParticipantId>,
    ) -> DecisionHandle {
        self.register_participants(key, participants)
    }

    /// Record that `participant` prepared at `timestamp`.
    ///
    /// A vote for an unknown transaction is answered with an abort.
    #[instrument(
        skip_all,
        fields(lsid = %key.session_id, txn_number = %key.txn_number, participant = %participant)
    )]
    pub fn vote_commit(
        &self,
        key: TransactionKey,
        participant: ParticipantId,
        timestamp: CommitTimestamp,
    ) {
        match self.registry.lookup(&key) {
            Some(coordinator) => {
                let transition = coordinator.vote_commit(&participant, timestamp);
                self.disseminator.apply(&coordinator, transition);
            }
            None => {
                debug!("Commit vote for unknown transaction, sending abort");
                self.disseminator.send_standalone_abort(key, participant);
            }
        }
    }

    /// Record that `participant` could not prepare.
    #[instrument(
        skip_all,
        fields(lsid = %key.session_id, txn_number = %key.txn_number, participant = %participant)
    )]
    pub fn vote_abort(&self, key: TransactionKey, participant: ParticipantId) {
        match self.registry.lookup(&key) {
            Some(coordinator) => {
                let transition = coordinator.vote_abort(&participant);
                self.disseminator.apply(&coordinator, transition);
            }
            None => debug!("Abort vote for unknown transaction ignored"),
        }
    }

    /// Re-send the decision to a participant after a fatal failure was
    /// dealt with externally.
    #[instrument(
        skip_all,
        fields(lsid = %key.session_id, txn_number = %key.txn_number, participant = %participant),
        err
    )]
    pub fn resolve_fault(&self, key: TransactionKey, participant: ParticipantId) -> Result<()> {
        let coordinator = self
            .registry
            .lookup(&key)
            .ok_or(CoordinatorError::UnknownTransaction(key))?;

        match coordinator.resolve_fault(&participant) {
            Some(dispatch) => {
                info!("Fault resolved, re-sending decision");
                self.disseminator.dispatch(coordinator, dispatch, 0);
            }
            None => debug!("No failed delivery to resolve"),
        }
        Ok(())
    }

    /// Take the receiver for fatal delivery failures. Only the first call
    /// gets it.
    pub fn take_fault_receiver(&self) -> Option<mpsc::UnboundedReceiver<FaultReport>> {
        self.fault_rx.lock().take()
    }

    /// State of the live coordinator for `key`.
    pub fn coordinator_state(&self, key: &TransactionKey) -> Option<CoordinatorState> {
        self.registry.lookup(key).map(|c| c.state())
    }

    /// The live coordinator for `key`.
    pub fn coordinator(&self, key: &TransactionKey) -> Option<Arc<TransactionCoordinator>> {
        self.registry.lookup(key)
    }

    /// Keys of all live coordinators.
    pub fn active_coordinators(&self) -> Vec<TransactionKey> {
        self.registry.keys()
    }

    /// Registry backing this service.
    pub fn registry(&self) -> &Arc<CoordinatorRegistry> {
        &self.registry
    }

    /// Service configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Current counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Counters in Prometheus text format.
    pub fn metrics_prometheus(&self) -> String {
        self.metrics.to_prometheus()
    }

    /// Wait until no outbound command is in flight.
    pub async fn wait_idle(&self) {
        self.disseminator.wait_idle().await;
    }

    fn arm_deadline(&self, coordinator: &Arc<TransactionCoordinator>) {
        let CommitDeadline::At(at) = coordinator.deadline() else {
            return;
        };

        let weak = Arc::downgrade(coordinator);
        let disseminator = self.disseminator.clone();
        let metrics = self.metrics.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await;
            let Some(coordinator) = weak.upgrade() else {
                return;
            };

            let transition = coordinator.abort_undecided(AbortReason::DeadlineExpired);
            if transition.decided.is_some() {
                metrics.deadline_abort();
            }
            disseminator.apply(&coordinator, transition);
        });

        coordinator.set_deadline_timer(timer.abort_handle());
    }
}

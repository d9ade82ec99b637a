//! Delivery of fixed decisions to participants.
//!
//! The disseminator owns every outbound call. Each command is sent from its
//! own task so a slow participant never holds up vote processing; outcomes
//! are fed back into the coordinator that issued the command.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use txncoord_common::{now, CoordinatorError, ParticipantId, Timestamp, TransactionKey};
use txncoord_participant::{CommandOutcome, ParticipantClient};
use txncoord_protocol::ParticipantCommand;

use crate::config::{RetryConfig, RetryMode};
use crate::metrics::SharedMetrics;
use crate::registry::CoordinatorRegistry;
use crate::transaction::{Dispatch, Transition, TransactionCoordinator};

/// A fatal delivery failure that needs external resolution.
#[derive(Debug, Clone)]
pub struct FaultReport {
    /// Transaction whose decision could not be delivered.
    pub key: TransactionKey,
    /// Participant that rejected the command.
    pub participant: ParticipantId,
    /// The command that failed.
    pub command: ParticipantCommand,
    /// The failure.
    pub error: CoordinatorError,
    /// When the failure was observed.
    pub reported_at: Timestamp,
}

/// Sends decision commands and feeds their outcomes back.
#[derive(Clone)]
pub struct DecisionDisseminator {
    client: Arc<dyn ParticipantClient>,
    registry: Arc<CoordinatorRegistry>,
    retry: RetryConfig,
    metrics: SharedMetrics,
    faults: mpsc::UnboundedSender<FaultReport>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl DecisionDisseminator {
    /// Create a disseminator reporting fatal failures on `faults`.
    pub fn new(
        client: Arc<dyn ParticipantClient>,
        registry: Arc<CoordinatorRegistry>,
        retry: RetryConfig,
        metrics: SharedMetrics,
        faults: mpsc::UnboundedSender<FaultReport>,
    ) -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            client,
            registry,
            retry,
            metrics,
            faults,
            in_flight: Arc::new(in_flight),
        }
    }

    /// Carry out the side effects of a state machine step.
    ///
    /// Must be called without holding the coordinator's lock.
    pub fn apply(&self, coordinator: &Arc<TransactionCoordinator>, transition: Transition) {
        if let Some(decision) = transition.decided {
            self.metrics.decision(decision);
        }

        for dispatch in transition.dispatches {
            self.dispatch(coordinator.clone(), dispatch, 0);
        }

        if transition.done {
            self.finish(coordinator);
        }
    }

    /// Send one command from a background task.
    pub fn dispatch(
        &self,
        coordinator: Arc<TransactionCoordinator>,
        dispatch: Dispatch,
        attempt: u32,
    ) {
        self.in_flight.send_modify(|n| *n += 1);
        self.metrics.command_sent();

        debug!(
            lsid = %coordinator.key().session_id,
            txn_number = %coordinator.key().txn_number,
            participant = %dispatch.participant,
            command = dispatch.command.command_name(),
            sequence = dispatch.sequence,
            attempt,
            "Sending decision"
        );

        let this = self.clone();
        tokio::spawn(async move {
            let outcome = this
                .client
                .deliver(&dispatch.participant, &dispatch.command)
                .await;
            this.settle(&coordinator, dispatch, attempt, outcome);
            this.in_flight.send_modify(|n| *n -= 1);
        });
    }

    /// Tell a participant that voted on an unknown transaction to abort.
    ///
    /// Sent once; a participant that misses it will vote again.
    pub fn send_standalone_abort(&self, key: TransactionKey, participant: ParticipantId) {
        self.in_flight.send_modify(|n| *n += 1);
        self.metrics.standalone_abort();
        self.metrics.command_sent();

        let command = ParticipantCommand::abort(key);
        let this = self.clone();
        tokio::spawn(async move {
            let outcome = this.client.deliver(&participant, &command).await;
            match outcome {
                CommandOutcome::Ack => this.metrics.command_acked(),
                CommandOutcome::RetryableFailure(e) => {
                    this.metrics.retryable_failure();
                    warn!(
                        lsid = %key.session_id,
                        txn_number = %key.txn_number,
                        participant = %participant,
                        error = %e,
                        "Standalone abort not delivered"
                    );
                }
                CommandOutcome::FatalFailure(e) => {
                    this.metrics.fatal_failure();
                    this.report_fault(key, participant, command, e);
                }
            }
            this.in_flight.send_modify(|n| *n -= 1);
        });
    }

    /// Wait until no command is in flight.
    ///
    /// Retries waiting out their backoff do not count as in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    fn settle(
        &self,
        coordinator: &Arc<TransactionCoordinator>,
        dispatch: Dispatch,
        attempt: u32,
        outcome: CommandOutcome,
    ) {
        let key = *coordinator.key();
        match &outcome {
            CommandOutcome::Ack => self.metrics.command_acked(),
            CommandOutcome::RetryableFailure(_) => self.metrics.retryable_failure(),
            CommandOutcome::FatalFailure(_) => self.metrics.fatal_failure(),
        }

        // A later send to this participant owns its delivery state.
        let Some(transition) = coordinator.record_outcome(&dispatch, &outcome) else {
            return;
        };

        match &outcome {
            CommandOutcome::Ack => debug!(
                lsid = %key.session_id,
                txn_number = %key.txn_number,
                participant = %dispatch.participant,
                "Decision acknowledged"
            ),
            CommandOutcome::RetryableFailure(e) => warn!(
                lsid = %key.session_id,
                txn_number = %key.txn_number,
                participant = %dispatch.participant,
                error = %e,
                attempt,
                "Retryable failure delivering decision"
            ),
            CommandOutcome::FatalFailure(e) => self.report_fault(
                key,
                dispatch.participant.clone(),
                dispatch.command.clone(),
                e.clone(),
            ),
        }

        if transition.done {
            self.finish(coordinator);
        }

        if matches!(outcome, CommandOutcome::RetryableFailure(_))
            && self.retry.mode == RetryMode::Continuous
        {
            self.schedule_retry(coordinator.clone(), dispatch.participant, attempt);
        }
    }

    fn schedule_retry(
        &self,
        coordinator: Arc<TransactionCoordinator>,
        participant: ParticipantId,
        attempt: u32,
    ) {
        let delay = self.retry.backoff(attempt);
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A duplicate vote may already have re-sent it.
            if let Some(dispatch) = coordinator.retry_pending(&participant) {
                this.dispatch(coordinator, dispatch, attempt.saturating_add(1));
            }
        });
    }

    fn report_fault(
        &self,
        key: TransactionKey,
        participant: ParticipantId,
        command: ParticipantCommand,
        error: CoordinatorError,
    ) {
        error!(
            lsid = %key.session_id,
            txn_number = %key.txn_number,
            participant = %participant,
            command = command.command_name(),
            error = %error,
            error_code = error.error_code(),
            "Fatal failure delivering decision"
        );

        let report = FaultReport {
            key,
            participant,
            command,
            error,
            reported_at: now(),
        };
        if self.faults.send(report).is_err() {
            debug!("Fault channel closed, report dropped");
        }
    }

    fn finish(&self, coordinator: &Arc<TransactionCoordinator>) {
        coordinator.cancel_deadline_timer();

        if self.registry.remove_if_same(coordinator) {
            self.metrics.coordinator_removed();
            let key = coordinator.key();
            info!(
                lsid = %key.session_id,
                txn_number = %key.txn_number,
                decision = ?coordinator.decision(),
                elapsed_ms = coordinator.created_at().elapsed().as_millis() as u64,
                "Coordinator done"
            );
        }
    }
}

//! In-memory participant network.
//!
//! Every participant acknowledges by default. Tests script one-off responses
//! per participant, or inject a standing fault, and inspect the history of
//! commands the coordinator actually sent.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use txncoord_common::{now, CoordinatorError, ParticipantId, Result, Timestamp};
use txncoord_protocol::{MessageType, ParticipantCommand};

/// Standing fault applied to every command addressed to a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Participant is unreachable (retryable).
    Offline,
    /// Every response is delayed.
    Latency(Duration),
    /// Participant rejects every command (fatal).
    Reject(String),
}

/// A command observed by the simulated network.
#[derive(Debug, Clone)]
pub struct SentCommand {
    /// Addressed participant.
    pub participant: ParticipantId,
    /// The command itself.
    pub command: ParticipantCommand,
    /// What the participant answered.
    pub result: Result<()>,
    /// When the answer was produced.
    pub answered_at: Timestamp,
}

/// Participant client backed by in-memory state.
#[derive(Clone, Default)]
pub struct SimulatedParticipantClient {
    /// One-shot responses, consumed in order before faults apply.
    scripted: Arc<DashMap<ParticipantId, VecDeque<Result<()>>>>,
    /// Standing faults.
    faults: Arc<DashMap<ParticipantId, Fault>>,
    /// Every answered command, in answer order.
    history: Arc<Mutex<Vec<SentCommand>>>,
    /// Woken on every answered command.
    answered: Arc<Notify>,
}

impl SimulatedParticipantClient {
    /// Create a network where every participant acknowledges.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot response for the next command sent to `participant`.
    pub fn script(&self, participant: &ParticipantId, response: Result<()>) {
        self.scripted
            .entry(participant.clone())
            .or_default()
            .push_back(response);
    }

    /// Queue a retryable failure for the next command to `participant`.
    pub fn script_retryable_failure(&self, participant: &ParticipantId) {
        self.script(
            participant,
            Err(CoordinatorError::ParticipantUnreachable(participant.clone())),
        );
    }

    /// Queue a fatal failure for the next command to `participant`.
    pub fn script_fatal_failure(&self, participant: &ParticipantId, reason: impl Into<String>) {
        self.script(
            participant,
            Err(CoordinatorError::CommandRejected {
                participant: participant.clone(),
                reason: reason.into(),
            }),
        );
    }

    /// Apply a standing fault.
    pub fn inject_fault(&self, participant: &ParticipantId, fault: Fault) {
        debug!(participant = %participant, fault = ?fault, "Fault injected");
        self.faults.insert(participant.clone(), fault);
    }

    /// Remove a standing fault.
    pub fn clear_fault(&self, participant: &ParticipantId) {
        if self.faults.remove(participant).is_some() {
            debug!(participant = %participant, "Fault cleared");
        }
    }

    /// Snapshot of every answered command.
    pub fn history(&self) -> Vec<SentCommand> {
        self.history.lock().clone()
    }

    /// Commands answered for one participant.
    pub fn sent_to(&self, participant: &ParticipantId) -> Vec<SentCommand> {
        self.history
            .lock()
            .iter()
            .filter(|c| &c.participant == participant)
            .cloned()
            .collect()
    }

    /// Number of commands of `message_type` sent to `participant`.
    pub fn count(&self, participant: &ParticipantId, message_type: MessageType) -> usize {
        self.history
            .lock()
            .iter()
            .filter(|c| &c.participant == participant && c.command.message_type() == message_type)
            .count()
    }

    /// Total number of answered commands.
    pub fn total_sent(&self) -> usize {
        self.history.lock().len()
    }

    /// Wait until at least `n` commands have been answered.
    pub async fn wait_for_commands(&self, n: usize) {
        loop {
            let notified = self.answered.notified();
            if self.total_sent() >= n {
                return;
            }
            notified.await;
        }
    }

    fn next_response(&self, participant: &ParticipantId) -> (Option<Duration>, Result<()>) {
        if let Some(mut queue) = self.scripted.get_mut(participant) {
            if let Some(response) = queue.pop_front() {
                return (None, response);
            }
        }

        match self.faults.get(participant).map(|f| f.value().clone()) {
            Some(Fault::Offline) => (
                None,
                Err(CoordinatorError::ParticipantUnreachable(participant.clone())),
            ),
            Some(Fault::Latency(delay)) => (Some(delay), Ok(())),
            Some(Fault::Reject(reason)) => (
                None,
                Err(CoordinatorError::CommandRejected {
                    participant: participant.clone(),
                    reason,
                }),
            ),
            None => (None, Ok(())),
        }
    }
}

#[async_trait]
impl crate::client::ParticipantClient for SimulatedParticipantClient {
    async fn send_command(
        &self,
        participant: &ParticipantId,
        command: &ParticipantCommand,
    ) -> Result<()> {
        let (delay, result) = self.next_response(participant);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        debug!(
            participant = %participant,
            command = command.command_name(),
            ok = result.is_ok(),
            "Simulated participant answered"
        );

        self.history.lock().push(SentCommand {
            participant: participant.clone(),
            command: command.clone(),
            result: result.clone(),
            answered_at: now(),
        });
        self.answered.notify_waiters();

        result
    }
}

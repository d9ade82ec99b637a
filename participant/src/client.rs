//! Participant client abstraction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use txncoord_common::{CoordinatorError, ParticipantId, Result};
use txncoord_protocol::ParticipantCommand;

use crate::config::ClientConfig;

/// Classified result of delivering one command to one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The participant durably applied the command.
    Ack,
    /// Transient failure; the same command may be sent again.
    RetryableFailure(CoordinatorError),
    /// Permanent failure; needs external resolution.
    FatalFailure(CoordinatorError),
}

impl CommandOutcome {
    /// Classify a transport result.
    pub fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => CommandOutcome::Ack,
            Err(e) if e.is_retryable() => CommandOutcome::RetryableFailure(e),
            Err(e) => CommandOutcome::FatalFailure(e),
        }
    }

    /// Check if the participant acknowledged.
    pub fn is_ack(&self) -> bool {
        matches!(self, CommandOutcome::Ack)
    }
}

/// Delivers coordinator commands to participant shards.
///
/// Implementations must be safe to call concurrently; the coordinator
/// never holds any of its own locks across a call.
#[async_trait]
pub trait ParticipantClient: Send + Sync {
    /// Deliver `command` to `participant`. `Ok` means acknowledged.
    async fn send_command(
        &self,
        participant: &ParticipantId,
        command: &ParticipantCommand,
    ) -> Result<()>;

    /// Deliver and classify.
    async fn deliver(
        &self,
        participant: &ParticipantId,
        command: &ParticipantCommand,
    ) -> CommandOutcome {
        CommandOutcome::from_result(self.send_command(participant, command).await)
    }
}

#[async_trait]
impl<C: ParticipantClient + ?Sized> ParticipantClient for Arc<C> {
    async fn send_command(
        &self,
        participant: &ParticipantId,
        command: &ParticipantCommand,
    ) -> Result<()> {
        (**self).send_command(participant, command).await
    }
}

/// Wraps a client and bounds each request by the configured timeout.
///
/// An elapsed request is reported as a retryable timeout.
pub struct TimeoutClient<C> {
    inner: C,
    request_timeout: Duration,
}

impl<C: ParticipantClient> TimeoutClient<C> {
    /// Wrap `inner` using the timeout from `config`.
    pub fn new(inner: C, config: &ClientConfig) -> Self {
        Self {
            inner,
            request_timeout: config.request_timeout,
        }
    }

    /// Get the wrapped client.
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: ParticipantClient> ParticipantClient for TimeoutClient<C> {
    async fn send_command(
        &self,
        participant: &ParticipantId,
        command: &ParticipantCommand,
    ) -> Result<()> {
        match tokio::time::timeout(
            self.request_timeout,
            self.inner.send_command(participant, command),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                debug!(
                    participant = %participant,
                    command = command.command_name(),
                    "Participant request timed out"
                );
                Err(CoordinatorError::Timeout(format!(
                    "{} to {}",
                    command.command_name(),
                    participant
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{Fault, SimulatedParticipantClient};
    use txncoord_common::{SessionId, TransactionKey};

    #[test]
    fn test_outcome_classification() {
        let p = ParticipantId::new("s1");
        assert_eq!(CommandOutcome::from_result(Ok(())), CommandOutcome::Ack);
        assert!(matches!(
            CommandOutcome::from_result(Err(CoordinatorError::ParticipantUnreachable(p.clone()))),
            CommandOutcome::RetryableFailure(_)
        ));
        assert!(matches!(
            CommandOutcome::from_result(Err(CoordinatorError::CommandRejected {
                participant: p,
                reason: "no such transaction".to_string(),
            })),
            CommandOutcome::FatalFailure(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_client_reports_retryable() {
        let simulated = SimulatedParticipantClient::new();
        let p = ParticipantId::new("s1");
        simulated.inject_fault(&p, Fault::Latency(Duration::from_secs(30)));

        let config = ClientConfig {
            request_timeout: Duration::from_secs(1),
        };
        let client = TimeoutClient::new(simulated, &config);
        let key = TransactionKey::new(SessionId::new(), 1);

        let outcome = client.deliver(&p, &ParticipantCommand::abort(key)).await;
        assert!(matches!(
            outcome,
            CommandOutcome::RetryableFailure(CoordinatorError::Timeout(_))
        ));
    }
}

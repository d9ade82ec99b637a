//! Error types for the transaction coordinator.

use crate::{ParticipantId, TransactionKey, TxnNumber};
use thiserror::Error;

/// Main error type for coordinator and transport operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// A coordinator is already live for this exact key.
    #[error("Coordinator already exists for transaction {0}")]
    CoordinatorExists(TransactionKey),

    /// A newer transaction is already being coordinated on the session.
    #[error("Transaction {key} is older than active transaction number {active}")]
    StaleTransaction {
        key: TransactionKey,
        active: TxnNumber,
    },

    /// No live coordinator for this key.
    #[error("No coordinator for transaction {0}")]
    UnknownTransaction(TransactionKey),

    /// Participant could not be reached.
    #[error("Participant unreachable: {0}")]
    ParticipantUnreachable(ParticipantId),

    /// Network error while talking to a participant.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Timeout.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Participant refused the command and will keep refusing it.
    #[error("Participant {participant} rejected command: {reason}")]
    CommandRejected {
        participant: ParticipantId,
        reason: String,
    },

    /// Internal state machine invariant was about to be broken.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl CoordinatorError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::ParticipantUnreachable(_)
                | CoordinatorError::NetworkError(_)
                | CoordinatorError::Timeout(_)
        )
    }

    /// Get a stable error code for logs and fault reports.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoordinatorError::CoordinatorExists(_) => "COORDINATOR_EXISTS",
            CoordinatorError::StaleTransaction { .. } => "STALE_TRANSACTION",
            CoordinatorError::UnknownTransaction(_) => "UNKNOWN_TRANSACTION",
            CoordinatorError::ParticipantUnreachable(_) => "PARTICIPANT_UNREACHABLE",
            CoordinatorError::NetworkError(_) => "NETWORK_ERROR",
            CoordinatorError::Timeout(_) => "TIMEOUT",
            CoordinatorError::CommandRejected { .. } => "COMMAND_REJECTED",
            CoordinatorError::InvariantViolation(_) => "INVARIANT_VIOLATION",
        }
    }
}

/// Result type alias for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

//! Protocol message types.
//!
//! These types represent the commands sent from the coordinator to each
//! participant. Both commands are idempotent on the participant side: a
//! participant that already applied the outcome acknowledges a repeat.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use txncoord_common::{CommitTimestamp, TransactionKey};

/// Protocol version stamped on every command.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Command name of the commit command.
pub const COMMIT_COMMAND_NAME: &str = "commitTransaction";

/// Command name of the abort command.
pub const ABORT_COMMAND_NAME: &str = "abortTransaction";

/// Commit command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitCommand {
    /// Protocol version.
    pub version: String,
    /// Message type identifier.
    pub message_type: MessageType,
    /// Transaction being committed.
    pub key: TransactionKey,
    /// Timestamp the participant reported with its commit vote.
    pub commit_timestamp: CommitTimestamp,
    /// When the coordinator issued the command.
    pub issued_at: DateTime<Utc>,
}

impl CommitCommand {
    /// Create a new commit command.
    pub fn new(key: TransactionKey, commit_timestamp: CommitTimestamp) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            message_type: MessageType::CommitTransaction,
            key,
            commit_timestamp,
            issued_at: Utc::now(),
        }
    }
}

/// Abort command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortCommand {
    /// Protocol version.
    pub version: String,
    /// Message type identifier.
    pub message_type: MessageType,
    /// Transaction being aborted.
    pub key: TransactionKey,
    /// When the coordinator issued the command.
    pub issued_at: DateTime<Utc>,
}

impl AbortCommand {
    /// Create a new abort command.
    pub fn new(key: TransactionKey) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            message_type: MessageType::AbortTransaction,
            key,
            issued_at: Utc::now(),
        }
    }
}

/// Message type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    CommitTransaction,
    AbortTransaction,
}

impl MessageType {
    /// Wire command name.
    pub fn command_name(&self) -> &'static str {
        match self {
            MessageType::CommitTransaction => COMMIT_COMMAND_NAME,
            MessageType::AbortTransaction => ABORT_COMMAND_NAME,
        }
    }
}

/// Any command the coordinator can send to a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum ParticipantCommand {
    /// Apply the commit.
    Commit(CommitCommand),
    /// Roll back.
    Abort(AbortCommand),
}

impl ParticipantCommand {
    /// Build a commit command.
    pub fn commit(key: TransactionKey, commit_timestamp: CommitTimestamp) -> Self {
        ParticipantCommand::Commit(CommitCommand::new(key, commit_timestamp))
    }

    /// Build an abort command.
    pub fn abort(key: TransactionKey) -> Self {
        ParticipantCommand::Abort(AbortCommand::new(key))
    }

    /// Transaction this command refers to.
    pub fn key(&self) -> &TransactionKey {
        match self {
            ParticipantCommand::Commit(c) => &c.key,
            ParticipantCommand::Abort(a) => &a.key,
        }
    }

    /// Message type of the wrapped command.
    pub fn message_type(&self) -> MessageType {
        match self {
            ParticipantCommand::Commit(c) => c.message_type,
            ParticipantCommand::Abort(a) => a.message_type,
        }
    }

    /// Wire command name.
    pub fn command_name(&self) -> &'static str {
        self.message_type().command_name()
    }

    /// Check if this is a commit command.
    pub fn is_commit(&self) -> bool {
        matches!(self, ParticipantCommand::Commit(_))
    }

    /// Check if this is an abort command.
    pub fn is_abort(&self) -> bool {
        matches!(self, ParticipantCommand::Abort(_))
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the JSON wire form.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Errors encoding or decoding commands.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// JSON (de)serialization failed.
    #[error("Malformed command: {0}")]
    Malformed(#[from] serde_json::Error),
}

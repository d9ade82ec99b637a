//! Identifier types for transactions and their participants.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Logical session identifier of the client that owns a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing transaction number within a session.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TxnNumber(u64);

impl TxnNumber {
    /// Create a transaction number.
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// Get the raw value.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The transaction number that follows this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u64> for TxnNumber {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

impl fmt::Display for TxnNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a single distributed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionKey {
    /// Owning session.
    pub session_id: SessionId,
    /// Transaction number within the session.
    pub txn_number: TxnNumber,
}

impl TransactionKey {
    /// Create a new transaction key.
    pub fn new(session_id: SessionId, txn_number: impl Into<TxnNumber>) -> Self {
        Self {
            session_id,
            txn_number: txn_number.into(),
        }
    }

    /// Key of the next transaction on the same session.
    pub fn next(&self) -> Self {
        Self {
            session_id: self.session_id,
            txn_number: self.txn_number.next(),
        }
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session_id, self.txn_number)
    }
}

/// Identifier of a participant shard.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Create a new participant ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate the participant ID format.
    pub fn is_valid(&self) -> bool {
        // Shard names: non-empty, alphanumeric plus '-' and '_'
        !self.0.is_empty()
            && self.0.len() <= 64
            && self
                .0
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_parse() {
        let uuid_str = "019456ab-1234-4def-8901-234567890abc";
        let id = SessionId::parse(uuid_str).unwrap();
        assert_eq!(id.to_string(), uuid_str);
    }

    #[test]
    fn test_transaction_key_ordering() {
        let session = SessionId::new();
        let first = TransactionKey::new(session, 1);
        let second = first.next();

        assert_eq!(second.txn_number, TxnNumber::new(2));
        assert_eq!(second.session_id, session);
        assert!(first < second);
    }

    #[test]
    fn test_participant_id_validation() {
        assert!(ParticipantId::new("shard-1").is_valid());
        assert!(ParticipantId::new("s1").is_valid());
        assert!(!ParticipantId::new("").is_valid());
        assert!(!ParticipantId::new("shard 1").is_valid());
    }
}

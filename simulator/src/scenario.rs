//! Simulation scenarios.

use std::path::Path;

use serde::{Deserialize, Serialize};

use txncoord_coordinator::CommitDecision;
use txncoord_protocol::MessageType;

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
///
/// Transactions are referred to by label; each label gets its own session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Create a coordinator.
    Create {
        txn: String,
        #[serde(default)]
        deadline_ms: Option<u64>,
    },
    /// Supply the participant list.
    Coordinate {
        txn: String,
        participants: Vec<String>,
    },
    /// A participant votes commit.
    VoteCommit {
        txn: String,
        participant: String,
        #[serde(default)]
        timestamp: u32,
    },
    /// A participant votes abort.
    VoteAbort { txn: String, participant: String },
    /// Inject a fault.
    InjectFault { fault_type: FaultType, target: String },
    /// Clear a fault.
    ClearFault { target: String },
    /// Re-send after a fatal failure.
    ResolveFault { txn: String, participant: String },
    /// Wait for a duration.
    Wait { millis: u64 },
    /// Wait until nothing is in flight.
    WaitIdle,
    /// Assert a condition.
    Assert { condition: AssertCondition },
}

/// Types of faults that can be injected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FaultType {
    /// Shard unreachable.
    ShardOffline,
    /// Network latency.
    NetworkLatency { delay_ms: u64 },
    /// Shard rejects every command.
    ShardRejects { reason: String },
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssertCondition {
    /// The transaction's handle resolved to `decision`.
    Decision { txn: String, decision: CommitDecision },
    /// The transaction's handle is still unresolved.
    Undecided { txn: String },
    /// `participant` answered exactly `count` commands of a type.
    CommandsSent {
        participant: String,
        message_type: MessageType,
        count: usize,
    },
    /// The transaction's coordinator has finished and been removed.
    Finished { txn: String },
}

impl Scenario {
    /// Load a scenario by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "commit" => Ok(Self::commit()),
            "abort" => Ok(Self::abort()),
            "retry" => Ok(Self::retry()),
            "late-vote" => Ok(Self::late_vote()),
            "deadline" => Ok(Self::deadline()),
            _ => Err(anyhow::anyhow!(
                "Unknown scenario: {} (built-in: {})",
                name,
                Self::builtin_names().join(", ")
            )),
        }
    }

    /// Load a scenario from a JSON file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Names of the built-in scenarios.
    pub fn builtin_names() -> &'static [&'static str] {
        &["commit", "abort", "retry", "late-vote", "deadline"]
    }

    /// Two shards vote commit.
    fn commit() -> Self {
        Self {
            name: "commit".to_string(),
            description: "Two shards prepare and the transaction commits".to_string(),
            steps: vec![
                create("t1"),
                coordinate("t1", &["shard-a", "shard-b"]),
                vote_commit("t1", "shard-a"),
                vote_commit("t1", "shard-b"),
                ScenarioStep::WaitIdle,
                assert_decision("t1", CommitDecision::Commit),
                assert_sent("shard-a", MessageType::CommitTransaction, 1),
                assert_sent("shard-b", MessageType::CommitTransaction, 1),
                assert_finished("t1"),
            ],
        }
    }

    /// One of three shards votes abort.
    fn abort() -> Self {
        Self {
            name: "abort".to_string(),
            description: "One shard refuses; the others are told to abort".to_string(),
            steps: vec![
                create("t1"),
                coordinate("t1", &["shard-a", "shard-b", "shard-c"]),
                vote_commit("t1", "shard-a"),
                ScenarioStep::VoteAbort {
                    txn: "t1".to_string(),
                    participant: "shard-b".to_string(),
                },
                ScenarioStep::WaitIdle,
                assert_decision("t1", CommitDecision::Abort),
                assert_sent("shard-a", MessageType::AbortTransaction, 1),
                assert_sent("shard-b", MessageType::AbortTransaction, 0),
                assert_sent("shard-c", MessageType::AbortTransaction, 1),
                assert_finished("t1"),
            ],
        }
    }

    /// A shard drops off after voting and comes back.
    fn retry() -> Self {
        Self {
            name: "retry".to_string(),
            description: "Commit reaches a shard that was unreachable when decided".to_string(),
            steps: vec![
                create("t1"),
                coordinate("t1", &["shard-a", "shard-b"]),
                vote_commit("t1", "shard-a"),
                ScenarioStep::InjectFault {
                    fault_type: FaultType::ShardOffline,
                    target: "shard-b".to_string(),
                },
                vote_commit("t1", "shard-b"),
                ScenarioStep::WaitIdle,
                assert_decision("t1", CommitDecision::Commit),
                ScenarioStep::ClearFault {
                    target: "shard-b".to_string(),
                },
                // Shard b resends its vote, which also covers on-vote retry.
                vote_commit("t1", "shard-b"),
                ScenarioStep::Wait { millis: 500 },
                ScenarioStep::WaitIdle,
                assert_finished("t1"),
            ],
        }
    }

    /// A shard votes after the transaction aborted and finished.
    fn late_vote() -> Self {
        Self {
            name: "late-vote".to_string(),
            description: "A straggler vote is answered with abort".to_string(),
            steps: vec![
                create("t1"),
                vote_commit("t1", "shard-a"),
                ScenarioStep::VoteAbort {
                    txn: "t1".to_string(),
                    participant: "shard-b".to_string(),
                },
                ScenarioStep::WaitIdle,
                assert_finished("t1"),
                vote_commit("t1", "shard-c"),
                ScenarioStep::WaitIdle,
                assert_sent("shard-a", MessageType::AbortTransaction, 1),
                assert_sent("shard-c", MessageType::AbortTransaction, 1),
                assert_sent("shard-c", MessageType::CommitTransaction, 0),
            ],
        }
    }

    /// Nobody finishes voting before the deadline.
    fn deadline() -> Self {
        Self {
            name: "deadline".to_string(),
            description: "An undecided transaction is aborted at its deadline".to_string(),
            steps: vec![
                ScenarioStep::Create {
                    txn: "t1".to_string(),
                    deadline_ms: Some(200),
                },
                coordinate("t1", &["shard-a", "shard-b"]),
                vote_commit("t1", "shard-a"),
                ScenarioStep::Assert {
                    condition: AssertCondition::Undecided {
                        txn: "t1".to_string(),
                    },
                },
                ScenarioStep::Wait { millis: 400 },
                ScenarioStep::WaitIdle,
                assert_decision("t1", CommitDecision::Abort),
                assert_sent("shard-a", MessageType::AbortTransaction, 1),
                assert_sent("shard-b", MessageType::AbortTransaction, 1),
            ],
        }
    }
}

fn create(txn: &str) -> ScenarioStep {
    ScenarioStep::Create {
        txn: txn.to_string(),
        deadline_ms: None,
    }
}

fn coordinate(txn: &str, participants: &[&str]) -> ScenarioStep {
    ScenarioStep::Coordinate {
        txn: txn.to_string(),
        participants: participants.iter().map(|p| p.to_string()).collect(),
    }
}

fn vote_commit(txn: &str, participant: &str) -> ScenarioStep {
    ScenarioStep::VoteCommit {
        txn: txn.to_string(),
        participant: participant.to_string(),
        timestamp: 1,
    }
}

fn assert_decision(txn: &str, decision: CommitDecision) -> ScenarioStep {
    ScenarioStep::Assert {
        condition: AssertCondition::Decision {
            txn: txn.to_string(),
            decision,
        },
    }
}

fn assert_sent(participant: &str, message_type: MessageType, count: usize) -> ScenarioStep {
    ScenarioStep::Assert {
        condition: AssertCondition::CommandsSent {
            participant: participant.to_string(),
            message_type,
            count,
        },
    }
}

fn assert_finished(txn: &str) -> ScenarioStep {
    ScenarioStep::Assert {
        condition: AssertCondition::Finished {
            txn: txn.to_string(),
        },
    }
}

//! TxnCoord Coordinator
//!
//! Two-phase commit coordination for transactions spanning several
//! participant shards. A coordinator collects votes, fixes a single commit
//! or abort decision, and drives every participant to apply it.

pub mod coordinator;
pub mod config;
pub mod decision;
pub mod disseminator;
pub mod registry;
pub mod state;
pub mod transaction;
pub mod metrics;

pub use coordinator::TransactionCoordinatorService;
pub use config::{CoordinatorConfig, RetryConfig, RetryMode};
pub use decision::{CommitDecision, DecisionHandle};
pub use disseminator::{DecisionDisseminator, FaultReport};
pub use registry::CoordinatorRegistry;
pub use state::CoordinatorState;
pub use transaction::{AckState, TransactionCoordinator, Vote};

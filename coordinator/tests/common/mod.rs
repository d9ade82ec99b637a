//! Shared helpers for coordinator integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use txncoord_common::{CommitDeadline, CommitTimestamp, ParticipantId, SessionId, TransactionKey};
use txncoord_coordinator::{
    CoordinatorConfig, RetryConfig, RetryMode, TransactionCoordinatorService,
};
use txncoord_participant::SimulatedParticipantClient;

pub const DUMMY_TIMESTAMP: CommitTimestamp = CommitTimestamp::new(1, 1);

/// Install a test log subscriber once per binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("txncoord=debug")
        .try_init();
}

pub fn config(mode: RetryMode) -> CoordinatorConfig {
    CoordinatorConfig {
        retry: RetryConfig {
            mode,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(400),
        },
        ..CoordinatorConfig::default()
    }
}

pub fn service(mode: RetryMode) -> (TransactionCoordinatorService, SimulatedParticipantClient) {
    init_tracing();
    let network = SimulatedParticipantClient::new();
    let service = TransactionCoordinatorService::new(config(mode), Arc::new(network.clone()));
    (service, network)
}

/// A service with a coordinator already created for the returned key.
pub fn single_txn(
    mode: RetryMode,
) -> (TransactionCoordinatorService, SimulatedParticipantClient, TransactionKey) {
    let (service, network) = service(mode);
    let key = TransactionKey::new(SessionId::new(), 1);
    service
        .create_coordinator(key, CommitDeadline::Never)
        .expect("fresh key");
    (service, network, key)
}

pub fn shard(name: &str) -> ParticipantId {
    ParticipantId::new(name)
}

pub fn two_shards() -> Vec<ParticipantId> {
    vec![shard("s1"), shard("s2")]
}

pub fn three_shards() -> Vec<ParticipantId> {
    vec![shard("s1"), shard("s2"), shard("s3")]
}

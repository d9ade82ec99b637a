//! Concurrent callers racing on the same and on different transactions.

mod common;

use std::sync::Arc;

use common::*;
use futures::future::join_all;
use txncoord_common::{CommitDeadline, SessionId, TransactionKey};
use txncoord_coordinator::{CommitDecision, RetryMode};
use txncoord_protocol::MessageType;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_votes_reach_one_decision() {
    let (service, network) = service(RetryMode::Continuous);
    let service = Arc::new(service);
    let shards: Vec<_> = (0..6).map(|i| shard(&format!("s{i}"))).collect();

    let mut keys = Vec::new();
    for txn in 1..=20u64 {
        let key = TransactionKey::new(SessionId::new(), txn);
        service.create_coordinator(key, CommitDeadline::Never).unwrap();
        keys.push(key);
    }

    let mut handles = Vec::new();
    let mut votes = Vec::new();
    for (i, key) in keys.iter().copied().enumerate() {
        // Every third transaction gets one abort vote.
        let aborting = (i % 3 == 0).then(|| shards[i % shards.len()].clone());

        handles.push(
            (0..3)
                .map(|_| service.coordinate_commit(key, shards.clone()))
                .collect::<Vec<_>>(),
        );

        for p in shards.iter().cloned() {
            let service = service.clone();
            let aborting = aborting.clone();
            votes.push(tokio::spawn(async move {
                if Some(&p) == aborting.as_ref() {
                    service.vote_abort(key, p);
                } else {
                    service.vote_commit(key, p, DUMMY_TIMESTAMP);
                }
            }));
        }
    }

    assert!(join_all(votes).await.iter().all(|r| r.is_ok()));

    for (i, (key, handles)) in keys.iter().zip(handles).enumerate() {
        let expected = if i % 3 == 0 {
            CommitDecision::Abort
        } else {
            CommitDecision::Commit
        };
        for handle in handles {
            assert_eq!(handle.wait().await, expected, "txn {key}");
        }
    }

    service.wait_idle().await;

    let metrics = service.metrics();
    assert_eq!(metrics.decisions_abort, 7);
    assert_eq!(metrics.decisions_commit, 13);
    assert_eq!(metrics.coordinators_active, 0);
    assert!(service.active_coordinators().is_empty());

    // Nobody was told both outcomes for the same transaction.
    for key in &keys {
        for p in &shards {
            let sent: Vec<_> = network
                .sent_to(p)
                .into_iter()
                .filter(|c| c.command.key() == key)
                .collect();
            let commits = sent.iter().filter(|c| c.command.is_commit()).count();
            let aborts = sent.iter().filter(|c| c.command.is_abort()).count();
            assert!(commits == 0 || aborts == 0);
        }
    }
    assert!(network.total_sent() > 0);
    assert_eq!(
        network
            .history()
            .iter()
            .filter(|c| c.command.message_type() == MessageType::CommitTransaction)
            .count(),
        13 * shards.len()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_create_admits_one() {
    let (service, _network) = service(RetryMode::OnDuplicateVote);
    let service = Arc::new(service);
    let key = TransactionKey::new(SessionId::new(), 1);

    let attempts = (0..16).map(|_| {
        let service = service.clone();
        tokio::spawn(async move { service.create_coordinator(key, CommitDeadline::Never).is_ok() })
    });

    let admitted = join_all(attempts)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(true)))
        .count();

    assert_eq!(admitted, 1);
    assert_eq!(service.active_coordinators(), vec![key]);
}

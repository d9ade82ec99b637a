//! Per-transaction commit coordination.
//!
//! A [`TransactionCoordinator`] owns the votes, the participant list, the
//! decision and the per-participant acknowledgement state of one
//! transaction. Every mutation happens under one mutex and returns a
//! [`Transition`] describing the commands that must go out; the caller sends
//! them after the lock is released.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use txncoord_common::{CommitDeadline, CommitTimestamp, ParticipantId, TransactionKey};
use txncoord_participant::CommandOutcome;
use txncoord_protocol::ParticipantCommand;

use crate::decision::{CommitDecision, DecisionCell, DecisionHandle};
use crate::state::CoordinatorState;

/// A participant's recorded vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    /// Prepared, with the timestamp it reported.
    Commit(CommitTimestamp),
    /// Refused to prepare.
    Abort,
}

/// Delivery state of the decision for one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    /// A send is outstanding.
    InFlight,
    /// Last send failed with a retryable error.
    Pending,
    /// The participant applied the decision.
    Acknowledged,
    /// Last send failed fatally; waits for external resolution.
    Failed,
}

/// Why the system, rather than a participant, aborted a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The commit deadline elapsed while undecided.
    DeadlineExpired,
    /// A newer transaction started on the same session.
    Superseded,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::DeadlineExpired => write!(f, "commit deadline expired"),
            AbortReason::Superseded => write!(f, "superseded by newer transaction"),
        }
    }
}

/// A command that must be delivered to a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    /// Target participant.
    pub participant: ParticipantId,
    /// Command to deliver.
    pub command: ParticipantCommand,
    /// Position of this send among all sends of the transaction. Only the
    /// latest send to a participant may report a failure.
    pub sequence: u64,
}

/// Side effects produced by one state machine step.
#[derive(Debug, Default)]
pub struct Transition {
    /// Commands to send, outside the coordinator lock.
    pub dispatches: Vec<Dispatch>,
    /// Set when this step fixed the decision.
    pub decided: Option<CommitDecision>,
    /// Set when this step reached the terminal state.
    pub done: bool,
}

impl Transition {
    /// Check if the step had no externally visible effect.
    pub fn is_empty(&self) -> bool {
        self.dispatches.is_empty() && self.decided.is_none() && !self.done
    }
}

struct Inner {
    state: CoordinatorState,
    participants: Option<BTreeSet<ParticipantId>>,
    votes: BTreeMap<ParticipantId, Vote>,
    acks: BTreeMap<ParticipantId, AckState>,
    latest_send: BTreeMap<ParticipantId, u64>,
    sends: u64,
    decision: DecisionCell,
}

impl Inner {
    fn all_voted_commit(&self) -> bool {
        match &self.participants {
            Some(members) => members
                .iter()
                .all(|p| matches!(self.votes.get(p), Some(Vote::Commit(_)))),
            None => false,
        }
    }

    fn command_for(
        &self,
        key: &TransactionKey,
        participant: &ParticipantId,
    ) -> Option<ParticipantCommand> {
        match self.decision.get()? {
            CommitDecision::Commit => match self.votes.get(participant) {
                Some(Vote::Commit(ts)) => Some(ParticipantCommand::commit(*key, *ts)),
                _ => None,
            },
            CommitDecision::Abort => Some(ParticipantCommand::abort(*key)),
        }
    }

    /// Mark `participant` in flight and queue its command.
    fn send_to(
        &mut self,
        key: &TransactionKey,
        participant: &ParticipantId,
        out: &mut Vec<Dispatch>,
    ) {
        match self.command_for(key, participant) {
            Some(command) => {
                self.sends += 1;
                self.acks.insert(participant.clone(), AckState::InFlight);
                self.latest_send.insert(participant.clone(), self.sends);
                out.push(Dispatch {
                    participant: participant.clone(),
                    command,
                    sequence: self.sends,
                });
            }
            None => error!(
                lsid = %key.session_id,
                txn_number = %key.txn_number,
                participant = %participant,
                "No command to send: decision not fixed or commit vote missing"
            ),
        }
    }

    /// Re-send to an addressed participant that has not acknowledged.
    ///
    /// An outstanding send is superseded rather than waited on, since it
    /// may never return. A fatally failed participant is left for
    /// `resolve_fault`. Returns false if the participant was never addressed.
    fn redeliver(
        &mut self,
        key: &TransactionKey,
        participant: &ParticipantId,
        out: &mut Vec<Dispatch>,
    ) -> bool {
        match self.acks.get(participant).copied() {
            Some(AckState::Pending) | Some(AckState::InFlight) => {
                self.send_to(key, participant, out);
                true
            }
            Some(AckState::Failed) | Some(AckState::Acknowledged) => true,
            None => false,
        }
    }

    fn fix(&mut self, key: &TransactionKey, decision: CommitDecision) -> bool {
        match self.decision.resolve(decision) {
            Ok(()) => {
                self.state = CoordinatorState::Deciding;
                info!(
                    lsid = %key.session_id,
                    txn_number = %key.txn_number,
                    decision = %decision,
                    "Commit decision fixed"
                );
                true
            }
            Err(e) => {
                error!(
                    lsid = %key.session_id,
                    txn_number = %key.txn_number,
                    error = %e,
                    "Refusing decision"
                );
                false
            }
        }
    }

    fn decide_commit(&mut self, key: &TransactionKey, t: &mut Transition) {
        if !self.fix(key, CommitDecision::Commit) {
            return;
        }
        t.decided = Some(CommitDecision::Commit);

        let members: Vec<ParticipantId> = self.participants.iter().flatten().cloned().collect();
        for participant in &members {
            self.send_to(key, participant, &mut t.dispatches);
        }
        t.done = self.complete_if_acknowledged();
    }

    fn decide_abort(&mut self, key: &TransactionKey, t: &mut Transition) {
        if !self.fix(key, CommitDecision::Abort) {
            return;
        }
        t.decided = Some(CommitDecision::Abort);

        // Everyone who prepared must roll back; once the list is known,
        // everyone who has not itself voted abort must hear about it too.
        let mut targets: BTreeSet<ParticipantId> = self
            .votes
            .iter()
            .filter(|(_, vote)| matches!(vote, Vote::Commit(_)))
            .map(|(p, _)| p.clone())
            .collect();
        if let Some(members) = &self.participants {
            targets.extend(
                members
                    .iter()
                    .filter(|p| !matches!(self.votes.get(*p), Some(Vote::Abort)))
                    .cloned(),
            );
        }

        for participant in &targets {
            self.send_to(key, participant, &mut t.dispatches);
        }
        t.done = self.complete_if_acknowledged();
    }

    fn complete_if_acknowledged(&mut self) -> bool {
        if self.state == CoordinatorState::Deciding
            && self.acks.values().all(|a| *a == AckState::Acknowledged)
        {
            self.state = CoordinatorState::Done;
            true
        } else {
            false
        }
    }
}

/// Commit coordinator for a single transaction.
pub struct TransactionCoordinator {
    key: TransactionKey,
    deadline: CommitDeadline,
    created_at: Instant,
    inner: Mutex<Inner>,
    deadline_timer: Mutex<Option<AbortHandle>>,
}

impl TransactionCoordinator {
    /// Create a coordinator that has heard nothing yet.
    pub fn new(key: TransactionKey, deadline: CommitDeadline) -> Self {
        Self {
            key,
            deadline,
            created_at: Instant::now(),
            inner: Mutex::new(Inner {
                state: CoordinatorState::CollectingParticipants,
                participants: None,
                votes: BTreeMap::new(),
                acks: BTreeMap::new(),
                latest_send: BTreeMap::new(),
                sends: 0,
                decision: DecisionCell::new(),
            }),
            deadline_timer: Mutex::new(None),
        }
    }

    /// Transaction this coordinator decides.
    pub fn key(&self) -> &TransactionKey {
        &self.key
    }

    /// Deadline the coordinator was created with.
    pub fn deadline(&self) -> CommitDeadline {
        self.deadline
    }

    /// When the coordinator was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Current state.
    pub fn state(&self) -> CoordinatorState {
        self.inner.lock().state
    }

    /// The decision, once fixed.
    pub fn decision(&self) -> Option<CommitDecision> {
        self.inner.lock().decision.get()
    }

    /// A handle on the eventual decision.
    pub fn decision_handle(&self) -> DecisionHandle {
        self.inner.lock().decision.handle()
    }

    /// Participant list, once received.
    pub fn participants(&self) -> Option<BTreeSet<ParticipantId>> {
        self.inner.lock().participants.clone()
    }

    /// Recorded vote of a participant.
    pub fn vote(&self, participant: &ParticipantId) -> Option<Vote> {
        self.inner.lock().votes.get(participant).copied()
    }

    /// Delivery state of a participant, if it has been addressed.
    pub fn ack_state(&self, participant: &ParticipantId) -> Option<AckState> {
        self.inner.lock().acks.get(participant).copied()
    }

    /// Supply the authoritative participant list.
    ///
    /// Only the first call has any effect; later calls just return another
    /// handle on the same decision.
    pub fn register_participants(
        &self,
        participants: BTreeSet<ParticipantId>,
    ) -> (DecisionHandle, Transition) {
        let mut inner = self.inner.lock();
        let handle = inner.decision.handle();
        let mut t = Transition::default();

        if let Some(existing) = &inner.participants {
            if *existing != participants {
                warn!(
                    lsid = %self.key.session_id,
                    txn_number = %self.key.txn_number,
                    "Ignoring differing participant list for transaction"
                );
            }
            return (handle, t);
        }

        debug!(
            lsid = %self.key.session_id,
            txn_number = %self.key.txn_number,
            participants = participants.len(),
            "Participant list received"
        );
        inner.participants = Some(participants);

        match inner.decision.get() {
            None => {
                inner.state = CoordinatorState::CollectingVotes;
                if inner.all_voted_commit() {
                    inner.decide_commit(&self.key, &mut t);
                }
            }
            Some(CommitDecision::Abort) => {
                let unaddressed: Vec<ParticipantId> = inner
                    .participants
                    .iter()
                    .flatten()
                    .filter(|p| {
                        !inner.acks.contains_key(*p)
                            && !matches!(inner.votes.get(*p), Some(Vote::Abort))
                    })
                    .cloned()
                    .collect();
                for participant in &unaddressed {
                    inner.send_to(&self.key, participant, &mut t.dispatches);
                }
                t.done = inner.complete_if_acknowledged();
            }
            Some(CommitDecision::Commit) => error!(
                lsid = %self.key.session_id,
                txn_number = %self.key.txn_number,
                "Commit decided before participant list was known"
            ),
        }

        (handle, t)
    }

    /// Record a commit vote.
    pub fn vote_commit(
        &self,
        participant: &ParticipantId,
        timestamp: CommitTimestamp,
    ) -> Transition {
        let mut inner = self.inner.lock();
        let mut t = Transition::default();

        match inner.decision.get() {
            None => {
                if let Some(Vote::Abort) = inner.votes.get(participant) {
                    warn!(
                        lsid = %self.key.session_id,
                        txn_number = %self.key.txn_number,
                        participant = %participant,
                        "Ignoring commit vote from participant that voted abort"
                    );
                    return t;
                }
                inner
                    .votes
                    .insert(participant.clone(), Vote::Commit(timestamp));
                debug!(
                    lsid = %self.key.session_id,
                    txn_number = %self.key.txn_number,
                    participant = %participant,
                    state = %inner.state,
                    "Commit vote recorded"
                );

                if inner.state == CoordinatorState::CollectingVotes {
                    let is_member = inner
                        .participants
                        .as_ref()
                        .is_some_and(|members| members.contains(participant));
                    if !is_member {
                        warn!(
                            lsid = %self.key.session_id,
                            txn_number = %self.key.txn_number,
                            participant = %participant,
                            "Commit vote from participant outside the participant list"
                        );
                    }
                    if inner.all_voted_commit() {
                        inner.decide_commit(&self.key, &mut t);
                    }
                }
            }
            Some(CommitDecision::Commit) => {
                if let Some(Vote::Commit(ts)) = inner.votes.get_mut(participant) {
                    *ts = timestamp;
                }
                if !inner.redeliver(&self.key, participant, &mut t.dispatches) {
                    warn!(
                        lsid = %self.key.session_id,
                        txn_number = %self.key.txn_number,
                        participant = %participant,
                        "Commit vote from participant not part of the committed transaction"
                    );
                }
            }
            Some(CommitDecision::Abort) => {
                inner
                    .votes
                    .entry(participant.clone())
                    .or_insert(Vote::Commit(timestamp));
                let addressed = inner.redeliver(&self.key, participant, &mut t.dispatches);
                let voted_abort = matches!(inner.votes.get(participant), Some(Vote::Abort));
                if !addressed && !voted_abort {
                    debug!(
                        lsid = %self.key.session_id,
                        txn_number = %self.key.txn_number,
                        participant = %participant,
                        "Late commit vote, adding participant to abort fan-out"
                    );
                    inner.send_to(&self.key, participant, &mut t.dispatches);
                }
            }
        }

        t
    }

    /// Record an abort vote.
    pub fn vote_abort(&self, participant: &ParticipantId) -> Transition {
        let mut inner = self.inner.lock();
        let mut t = Transition::default();

        if inner.decision.get() == Some(CommitDecision::Commit) {
            error!(
                lsid = %self.key.session_id,
                txn_number = %self.key.txn_number,
                participant = %participant,
                "Invariant violation: abort vote after commit decision, ignoring"
            );
            return t;
        }

        let previous = inner.votes.insert(participant.clone(), Vote::Abort);
        if previous == Some(Vote::Abort) {
            return t;
        }
        debug!(
            lsid = %self.key.session_id,
            txn_number = %self.key.txn_number,
            participant = %participant,
            "Abort vote recorded"
        );

        if inner.decision.get().is_none() {
            inner.decide_abort(&self.key, &mut t);
        }

        t
    }

    /// Abort on the system's behalf if still undecided.
    pub fn abort_undecided(&self, reason: AbortReason) -> Transition {
        let mut inner = self.inner.lock();
        let mut t = Transition::default();

        if inner.decision.get().is_none() {
            warn!(
                lsid = %self.key.session_id,
                txn_number = %self.key.txn_number,
                reason = %reason,
                "Aborting undecided transaction"
            );
            inner.decide_abort(&self.key, &mut t);
        }

        t
    }

    /// Apply the result of delivering `dispatch`.
    ///
    /// Returns `None` when the outcome is a failure of a send that a later
    /// send to the same participant has superseded; such failures are
    /// dropped. An acknowledgement counts whichever send it answers.
    pub fn record_outcome(
        &self,
        dispatch: &Dispatch,
        outcome: &CommandOutcome,
    ) -> Option<Transition> {
        let mut inner = self.inner.lock();
        let mut t = Transition::default();
        let participant = &dispatch.participant;

        if inner.state.is_terminal() {
            return Some(t);
        }
        let latest = inner.latest_send.get(participant).copied();
        if !outcome.is_ack() && latest != Some(dispatch.sequence) {
            debug!(
                lsid = %self.key.session_id,
                txn_number = %self.key.txn_number,
                participant = %participant,
                sequence = dispatch.sequence,
                latest = ?latest,
                "Ignoring failure of superseded send"
            );
            return None;
        }
        let Some(ack) = inner.acks.get_mut(participant) else {
            warn!(
                lsid = %self.key.session_id,
                txn_number = %self.key.txn_number,
                participant = %participant,
                "Outcome for participant that was never addressed"
            );
            return Some(t);
        };

        match outcome {
            CommandOutcome::Ack => *ack = AckState::Acknowledged,
            CommandOutcome::RetryableFailure(_) => {
                if *ack == AckState::InFlight {
                    *ack = AckState::Pending;
                }
            }
            CommandOutcome::FatalFailure(_) => {
                if *ack == AckState::InFlight {
                    *ack = AckState::Failed;
                }
            }
        }

        t.done = inner.complete_if_acknowledged();
        Some(t)
    }

    /// Re-send to a participant whose last send failed retryably.
    pub fn retry_pending(&self, participant: &ParticipantId) -> Option<Dispatch> {
        self.resend_if(participant, AckState::Pending)
    }

    /// Re-send to a participant whose last send failed fatally.
    pub fn resolve_fault(&self, participant: &ParticipantId) -> Option<Dispatch> {
        self.resend_if(participant, AckState::Failed)
    }

    fn resend_if(&self, participant: &ParticipantId, expected: AckState) -> Option<Dispatch> {
        let mut inner = self.inner.lock();
        if inner.state != CoordinatorState::Deciding
            || inner.acks.get(participant) != Some(&expected)
        {
            return None;
        }

        let mut out = Vec::with_capacity(1);
        inner.send_to(&self.key, participant, &mut out);
        out.pop()
    }

    /// Remember the task that enforces the deadline.
    pub(crate) fn set_deadline_timer(&self, timer: AbortHandle) {
        *self.deadline_timer.lock() = Some(timer);
    }

    /// Stop the deadline task, if any.
    pub(crate) fn cancel_deadline_timer(&self) {
        if let Some(timer) = self.deadline_timer.lock().take() {
            timer.abort();
        }
    }
}

impl fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("TransactionCoordinator")
            .field("key", &self.key)
            .field("state", &inner.state)
            .field("decision", &inner.decision.get())
            .field("participants", &inner.participants)
            .field("votes", &inner.votes)
            .field("acks", &inner.acks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use txncoord_common::{CoordinatorError, SessionId};

    fn coordinator() -> TransactionCoordinator {
        TransactionCoordinator::new(TransactionKey::new(SessionId::new(), 1), CommitDeadline::Never)
    }

    fn shards(names: &[&str]) -> BTreeSet<ParticipantId> {
        names.iter().map(|n| ParticipantId::new(*n)).collect()
    }

    fn targets(t: &Transition) -> Vec<&str> {
        t.dispatches.iter().map(|d| d.participant.as_str()).collect()
    }

    fn ack(c: &TransactionCoordinator, d: &Dispatch) -> Transition {
        c.record_outcome(d, &CommandOutcome::Ack).unwrap()
    }

    fn ack_all(c: &TransactionCoordinator, t: &Transition) -> Transition {
        let mut last = Transition::default();
        for d in &t.dispatches {
            last = ack(c, d);
        }
        last
    }

    fn offline(name: &str) -> CommandOutcome {
        CommandOutcome::RetryableFailure(CoordinatorError::ParticipantUnreachable(name.into()))
    }

    fn rejected(name: &str) -> CommandOutcome {
        CommandOutcome::FatalFailure(CoordinatorError::CommandRejected {
            participant: name.into(),
            reason: "write conflict".to_string(),
        })
    }

    fn ts() -> CommitTimestamp {
        CommitTimestamp::MIN
    }

    #[test]
    fn test_unanimous_commit_sends_commit_to_all() {
        let c = coordinator();
        let (handle, t) = c.register_participants(shards(&["s1", "s2"]));
        assert!(t.is_empty());
        assert_eq!(c.state(), CoordinatorState::CollectingVotes);

        assert!(c.vote_commit(&"s1".into(), ts()).is_empty());
        let t = c.vote_commit(&"s2".into(), CommitTimestamp::new(5, 1));

        assert_eq!(t.decided, Some(CommitDecision::Commit));
        assert_eq!(targets(&t), vec!["s1", "s2"]);
        assert!(t.dispatches.iter().all(|d| d.command.is_commit()));
        match &t.dispatches[1].command {
            ParticipantCommand::Commit(cmd) => {
                assert_eq!(cmd.commit_timestamp, CommitTimestamp::new(5, 1))
            }
            other => panic!("expected commit, got {other:?}"),
        }
        assert_eq!(handle.try_get(), Some(CommitDecision::Commit));

        assert!(ack_all(&c, &t).done);
        assert_eq!(c.state(), CoordinatorState::Done);
    }

    #[test]
    fn test_abort_after_registration_skips_aborting_participant() {
        let c = coordinator();
        let (handle, _) = c.register_participants(shards(&["s1", "s2"]));

        let t = c.vote_abort(&"s1".into());
        assert_eq!(t.decided, Some(CommitDecision::Abort));
        assert_eq!(targets(&t), vec!["s2"]);
        assert!(t.dispatches[0].command.is_abort());
        assert_eq!(handle.try_get(), Some(CommitDecision::Abort));
    }

    #[test]
    fn test_abort_fans_out_to_committed_and_silent_participants() {
        let c = coordinator();
        c.register_participants(shards(&["s1", "s2", "s3"]));

        assert!(c.vote_commit(&"s1".into(), ts()).is_empty());
        let t = c.vote_abort(&"s2".into());

        assert_eq!(targets(&t), vec!["s1", "s3"]);
        assert_eq!(c.decision(), Some(CommitDecision::Abort));
    }

    #[test]
    fn test_commit_vote_without_participant_list_sends_nothing() {
        let c = coordinator();
        assert!(c.vote_commit(&"s1".into(), ts()).is_empty());
        assert!(c.vote_commit(&"s1".into(), ts()).is_empty());
        assert_eq!(c.state(), CoordinatorState::CollectingParticipants);
        assert_eq!(c.vote(&"s1".into()), Some(Vote::Commit(ts())));
    }

    #[test]
    fn test_lone_abort_vote_completes_without_sending() {
        let c = coordinator();
        let t = c.vote_abort(&"s1".into());

        assert_eq!(t.decided, Some(CommitDecision::Abort));
        assert!(t.dispatches.is_empty());
        assert!(t.done);
        assert_eq!(c.state(), CoordinatorState::Done);
    }

    #[test]
    fn test_abort_before_list_rolls_back_prepared_participants() {
        let c = coordinator();
        c.vote_commit(&"s1".into(), ts());

        let t = c.vote_abort(&"s2".into());
        assert_eq!(targets(&t), vec!["s1"]);
        assert!(!t.done);
    }

    #[test]
    fn test_registration_after_abort_notifies_remaining_members() {
        let c = coordinator();
        c.vote_commit(&"s1".into(), ts());
        let t = c.vote_abort(&"s2".into());
        assert_eq!(targets(&t), vec!["s1"]);

        let (handle, t) = c.register_participants(shards(&["s1", "s2", "s3"]));
        assert_eq!(targets(&t), vec!["s3"]);
        assert_eq!(handle.try_get(), Some(CommitDecision::Abort));
    }

    #[test]
    fn test_registration_completes_unanimity() {
        let c = coordinator();
        c.vote_commit(&"s1".into(), ts());
        c.vote_commit(&"s2".into(), ts());

        let (handle, t) = c.register_participants(shards(&["s1", "s2"]));
        assert_eq!(t.decided, Some(CommitDecision::Commit));
        assert_eq!(targets(&t), vec!["s1", "s2"]);
        assert!(handle.is_ready());
    }

    #[test]
    fn test_second_registration_has_no_effect() {
        let c = coordinator();
        let (first, _) = c.register_participants(shards(&["s1", "s2"]));
        let (second, t) = c.register_participants(shards(&["s1", "s2", "s3"]));

        assert!(t.is_empty());
        assert_eq!(c.participants(), Some(shards(&["s1", "s2"])));

        c.vote_abort(&"s1".into());
        assert_eq!(first.try_get(), second.try_get());
    }

    #[test]
    fn test_duplicate_commit_vote_resends_only_to_unacknowledged() {
        let c = coordinator();
        c.register_participants(shards(&["s1", "s2"]));
        c.vote_commit(&"s1".into(), ts());
        let t = c.vote_commit(&"s2".into(), ts());

        ack(&c, &t.dispatches[0]);
        c.record_outcome(&t.dispatches[1], &offline("s2")).unwrap();
        assert_eq!(c.ack_state(&"s2".into()), Some(AckState::Pending));

        assert!(c.vote_commit(&"s1".into(), ts()).is_empty());

        let t = c.vote_commit(&"s2".into(), ts());
        assert_eq!(targets(&t), vec!["s2"]);
        assert!(ack(&c, &t.dispatches[0]).done);
    }

    #[test]
    fn test_duplicate_vote_supersedes_outstanding_send() {
        let c = coordinator();
        c.register_participants(shards(&["s1"]));
        let first = c.vote_commit(&"s1".into(), ts()).dispatches.remove(0);
        assert_eq!(c.ack_state(&"s1".into()), Some(AckState::InFlight));

        let second = c.vote_commit(&"s1".into(), ts()).dispatches.remove(0);
        assert!(second.command.is_commit());
        assert!(second.sequence > first.sequence);

        // The superseded send's failure must not clobber the newer one.
        assert!(c.record_outcome(&first, &offline("s1")).is_none());
        assert!(c.record_outcome(&first, &rejected("s1")).is_none());
        assert_eq!(c.ack_state(&"s1".into()), Some(AckState::InFlight));
        assert!(c.retry_pending(&"s1".into()).is_none());

        assert!(ack(&c, &second).done);
    }

    #[test]
    fn test_late_ack_of_superseded_send_counts() {
        let c = coordinator();
        c.register_participants(shards(&["s1"]));
        let first = c.vote_commit(&"s1".into(), ts()).dispatches.remove(0);
        let second = c.vote_commit(&"s1".into(), ts()).dispatches.remove(0);

        c.record_outcome(&second, &offline("s1")).unwrap();
        assert_eq!(c.ack_state(&"s1".into()), Some(AckState::Pending));

        assert!(ack(&c, &first).done);
        assert_eq!(c.state(), CoordinatorState::Done);
    }

    #[test]
    fn test_duplicate_vote_leaves_failed_participant_for_resolution() {
        let c = coordinator();
        c.register_participants(shards(&["s1"]));
        let t = c.vote_commit(&"s1".into(), ts());
        c.record_outcome(&t.dispatches[0], &rejected("s1")).unwrap();

        assert!(c.vote_commit(&"s1".into(), ts()).is_empty());
        assert_eq!(c.ack_state(&"s1".into()), Some(AckState::Failed));

        let dispatch = c.resolve_fault(&"s1".into()).unwrap();
        assert!(ack(&c, &dispatch).done);
    }

    #[test]
    fn test_abort_vote_after_commit_is_refused() {
        let c = coordinator();
        c.register_participants(shards(&["s1"]));
        c.vote_commit(&"s1".into(), ts());

        assert!(c.vote_abort(&"s1".into()).is_empty());
        assert_eq!(c.decision(), Some(CommitDecision::Commit));
        assert_eq!(c.vote(&"s1".into()), Some(Vote::Commit(ts())));
    }

    #[test]
    fn test_repeated_abort_votes_are_idempotent() {
        let c = coordinator();
        c.register_participants(shards(&["s1", "s2", "s3"]));

        let t = c.vote_abort(&"s1".into());
        assert_eq!(targets(&t), vec!["s2", "s3"]);
        assert!(c.vote_abort(&"s1".into()).is_empty());
        assert!(c.vote_abort(&"s2".into()).is_empty());
    }

    #[test]
    fn test_late_commit_vote_under_abort_gets_abort() {
        let c = coordinator();
        c.vote_commit(&"s1".into(), ts());
        c.vote_abort(&"s2".into());

        let t = c.vote_commit(&"s3".into(), ts());
        assert_eq!(targets(&t), vec!["s3"]);
        assert!(t.dispatches[0].command.is_abort());
        assert!(t.decided.is_none());
    }

    #[test]
    fn test_fatal_failure_pins_until_resolved() {
        let c = coordinator();
        c.register_participants(shards(&["s1"]));
        let t = c.vote_commit(&"s1".into(), ts());

        let t = c.record_outcome(&t.dispatches[0], &rejected("s1")).unwrap();
        assert!(!t.done);
        assert_eq!(c.ack_state(&"s1".into()), Some(AckState::Failed));
        assert!(c.retry_pending(&"s1".into()).is_none());

        let dispatch = c.resolve_fault(&"s1".into()).unwrap();
        assert!(dispatch.command.is_commit());
        assert!(ack(&c, &dispatch).done);
    }

    #[test]
    fn test_system_abort_only_when_undecided() {
        let c = coordinator();
        c.register_participants(shards(&["s1", "s2"]));
        c.vote_commit(&"s1".into(), ts());

        let t = c.abort_undecided(AbortReason::DeadlineExpired);
        assert_eq!(t.decided, Some(CommitDecision::Abort));
        assert_eq!(targets(&t), vec!["s1", "s2"]);

        assert!(c.abort_undecided(AbortReason::Superseded).is_empty());
    }

    #[derive(Debug, Clone)]
    enum Step {
        Register,
        Commit(usize),
        Abort(usize),
    }

    fn steps(n: usize) -> impl Strategy<Value = Vec<Step>> {
        prop::collection::vec(
            prop_oneof![
                1 => Just(Step::Register),
                4 => (0..n).prop_map(Step::Commit),
                1 => (0..n).prop_map(Step::Abort),
            ],
            0..16,
        )
    }

    proptest! {
        #[test]
        fn prop_decision_follows_vote_order(
            (n, script) in (1usize..5).prop_flat_map(|n| (Just(n), steps(n)))
        ) {
            let c = coordinator();
            let members: BTreeSet<ParticipantId> =
                (0..n).map(|i| ParticipantId::new(format!("s{i}"))).collect();
            let name = |i: usize| ParticipantId::new(format!("s{i}"));

            let mut registered = false;
            let mut committed: BTreeSet<usize> = BTreeSet::new();
            let mut expected: Option<CommitDecision> = None;
            let mut observed: Option<CommitDecision> = None;

            for step in &script {
                match step {
                    Step::Register => {
                        c.register_participants(members.clone());
                        registered = true;
                    }
                    Step::Commit(i) => {
                        c.vote_commit(&name(*i), ts());
                        if expected.is_none() {
                            committed.insert(*i);
                        }
                    }
                    Step::Abort(i) => {
                        c.vote_abort(&name(*i));
                        if expected.is_none() {
                            expected = Some(CommitDecision::Abort);
                        }
                    }
                }
                if expected.is_none() && registered && committed.len() == n {
                    expected = Some(CommitDecision::Commit);
                }

                let now = c.decision();
                if let Some(previous) = observed {
                    prop_assert_eq!(now, Some(previous));
                }
                observed = now;
            }

            prop_assert_eq!(c.decision(), expected);
        }
    }
}

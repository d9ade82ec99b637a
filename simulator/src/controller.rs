//! Simulation controller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use txncoord_common::{
    now, CommitDeadline, CommitTimestamp, ParticipantId, SessionId, TransactionKey,
};
use txncoord_coordinator::{CoordinatorConfig, DecisionHandle, TransactionCoordinatorService};
use txncoord_participant::{ClientConfig, Fault, SimulatedParticipantClient, TimeoutClient};

use crate::metrics::SimulationMetrics;
use crate::scenario::{AssertCondition, FaultType, Scenario, ScenarioStep};
use crate::shards::{FlakyNetwork, ShardFactory};

/// Knobs for a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationSettings {
    /// Number of shards.
    pub shards: usize,
    /// Generated transactions per second.
    pub rate: f64,
    /// Chance that a shard votes abort.
    pub abort_probability: f64,
    /// Chance that the network drops a command.
    pub failure_probability: f64,
    /// Random seed for reproducibility.
    pub seed: Option<u64>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            shards: 3,
            rate: 10.0,
            abort_probability: 0.1,
            failure_probability: 0.0,
            seed: None,
        }
    }
}

/// Transactions a scenario refers to, by label.
#[derive(Default)]
struct ScenarioState {
    keys: HashMap<String, TransactionKey>,
    handles: HashMap<String, DecisionHandle>,
}

impl ScenarioState {
    fn key(&mut self, txn: &str) -> TransactionKey {
        *self
            .keys
            .entry(txn.to_string())
            .or_insert_with(|| TransactionKey::new(SessionId::new(), 1))
    }
}

/// Controls the simulation.
pub struct SimulationController {
    /// Run settings.
    settings: SimulationSettings,
    /// Random number generator.
    rng: Arc<Mutex<StdRng>>,
    /// Coordinator under test.
    service: Arc<TransactionCoordinatorService>,
    /// Simulated shards.
    network: SimulatedParticipantClient,
    /// Shard identities.
    shards: Vec<ParticipantId>,
    /// Simulation metrics.
    metrics: Arc<RwLock<SimulationMetrics>>,
    /// Running flag.
    running: Arc<RwLock<bool>>,
}

impl SimulationController {
    /// Create a new simulation controller.
    pub fn new(
        settings: SimulationSettings,
        config: CoordinatorConfig,
        client_config: &ClientConfig,
    ) -> Self {
        let mut rng = match settings.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let network = SimulatedParticipantClient::new();
        let flaky =
            FlakyNetwork::new(network.clone(), settings.failure_probability, Some(rng.gen()));
        let client = TimeoutClient::new(flaky, client_config);
        let service = TransactionCoordinatorService::new(config, Arc::new(client));
        let shards = ShardFactory::create_shards(settings.shards);

        info!(
            shards = shards.len(),
            failure_probability = settings.failure_probability,
            "Simulation initialized"
        );

        Self {
            settings,
            rng: Arc::new(Mutex::new(rng)),
            service: Arc::new(service),
            network,
            shards,
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Run a scenario, failing on the first unmet assertion.
    pub async fn run_scenario(&self, scenario: Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);

        *self.running.write().await = true;

        let mut state = ScenarioState::default();
        for (index, step) in scenario.steps.iter().enumerate() {
            if !*self.running.read().await {
                break;
            }

            self.execute_step(step, &mut state)
                .await
                .map_err(|e| anyhow!("step {} of '{}' failed: {}", index + 1, scenario.name, e))?;
        }

        *self.running.write().await = false;

        info!("Scenario {} passed", scenario.name);
        Ok(())
    }

    /// Generate random transactions until `duration` elapses or Ctrl+C.
    pub async fn run(&self, duration: Option<Duration>) -> anyhow::Result<()> {
        if self.shards.is_empty() {
            bail!("continuous mode needs at least one shard");
        }
        info!(rate = self.settings.rate, "Running simulation in continuous mode");

        *self.running.write().await = true;

        let start = Instant::now();
        let generator = {
            let service = self.service.clone();
            let shards = self.shards.clone();
            let metrics = self.metrics.clone();
            let rng = self.rng.clone();
            let running = self.running.clone();
            let abort_probability = self.settings.abort_probability;
            let period = Duration::from_secs_f64(1.0 / self.settings.rate.max(0.001));

            tokio::spawn(async move {
                // One session per shard; each new transaction supersedes the
                // previous one on its session.
                let mut sessions: Vec<TransactionKey> = (0..shards.len())
                    .map(|_| TransactionKey::new(SessionId::new(), 0))
                    .collect();
                let mut in_flight: Vec<JoinHandle<()>> = Vec::new();
                let mut ticker = tokio::time::interval(period);

                while *running.read().await {
                    ticker.tick().await;
                    in_flight.retain(|t| !t.is_finished());

                    let (key, participants, votes) = {
                        let mut rng = rng.lock();
                        let session = rng.gen_range(0..sessions.len());
                        sessions[session] = sessions[session].next();

                        let count = rng.gen_range(1..=shards.len());
                        let participants: Vec<ParticipantId> =
                            shards.choose_multiple(&mut *rng, count).cloned().collect();
                        let votes: Vec<(bool, Duration)> = participants
                            .iter()
                            .map(|_| {
                                (
                                    rng.gen_bool(abort_probability.clamp(0.0, 1.0)),
                                    Duration::from_millis(rng.gen_range(0..20)),
                                )
                            })
                            .collect();
                        (sessions[session], participants, votes)
                    };

                    in_flight.push(tokio::spawn(run_transaction(
                        service.clone(),
                        metrics.clone(),
                        key,
                        participants,
                        votes,
                    )));
                }

                futures::future::join_all(in_flight).await;
            })
        };

        match duration {
            Some(d) => {
                tokio::time::sleep(d).await;
            }
            None => {
                tokio::signal::ctrl_c().await?;
            }
        }

        *self.running.write().await = false;
        generator.await?;
        self.service.wait_idle().await;

        let metrics = self.metrics.read().await;
        info!(
            elapsed_secs = start.elapsed().as_secs(),
            throughput = metrics.throughput(start.elapsed().as_secs()),
            "Continuous run finished"
        );

        Ok(())
    }

    /// Execute a single scenario step.
    async fn execute_step(
        &self,
        step: &ScenarioStep,
        state: &mut ScenarioState,
    ) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Create { txn, deadline_ms } => {
                let key = state.key(txn);
                let deadline = match deadline_ms {
                    Some(ms) => CommitDeadline::after(Duration::from_millis(*ms)),
                    None => self.service.default_deadline(),
                };
                info!("Creating coordinator for {} ({})", txn, key);
                self.service.create_coordinator(key, deadline)?;
            }
            ScenarioStep::Coordinate { txn, participants } => {
                let key = state.key(txn);
                info!("Coordinating {} across {:?}", txn, participants);
                let members = participants.iter().map(|p| ParticipantId::new(p.as_str()));
                let handle = self.service.coordinate_commit(key, members);
                state.handles.insert(txn.clone(), handle);
            }
            ScenarioStep::VoteCommit {
                txn,
                participant,
                timestamp,
            } => {
                let key = state.key(txn);
                debug!("{} votes commit on {}", participant, txn);
                self.service.vote_commit(
                    key,
                    ParticipantId::new(participant),
                    CommitTimestamp::new(*timestamp, 1),
                );
            }
            ScenarioStep::VoteAbort { txn, participant } => {
                let key = state.key(txn);
                debug!("{} votes abort on {}", participant, txn);
                self.service.vote_abort(key, ParticipantId::new(participant));
            }
            ScenarioStep::InjectFault { fault_type, target } => {
                info!("Injecting fault {:?} on {}", fault_type, target);
                let fault = match fault_type {
                    FaultType::ShardOffline => Fault::Offline,
                    FaultType::NetworkLatency { delay_ms } => {
                        Fault::Latency(Duration::from_millis(*delay_ms))
                    }
                    FaultType::ShardRejects { reason } => Fault::Reject(reason.clone()),
                };
                self.network.inject_fault(&ParticipantId::new(target), fault);
            }
            ScenarioStep::ClearFault { target } => {
                info!("Clearing fault on {}", target);
                self.network.clear_fault(&ParticipantId::new(target));
            }
            ScenarioStep::ResolveFault { txn, participant } => {
                let key = state.key(txn);
                info!("Resolving fault for {} on {}", participant, txn);
                self.service.resolve_fault(key, ParticipantId::new(participant))?;
            }
            ScenarioStep::Wait { millis } => {
                debug!("Waiting {}ms", millis);
                tokio::time::sleep(Duration::from_millis(*millis)).await;
            }
            ScenarioStep::WaitIdle => {
                self.service.wait_idle().await;
            }
            ScenarioStep::Assert { condition } => {
                info!("Asserting condition: {:?}", condition);
                self.check(condition, state)?;
            }
        }

        Ok(())
    }

    fn check(&self, condition: &AssertCondition, state: &mut ScenarioState) -> anyhow::Result<()> {
        match condition {
            AssertCondition::Decision { txn, decision } => {
                let key = state.key(txn);
                let actual = state
                    .handles
                    .get(txn)
                    .and_then(|h| h.try_get())
                    .or_else(|| self.service.coordinator(&key).and_then(|c| c.decision()));
                if actual != Some(*decision) {
                    bail!("expected {} to {}, got {:?}", txn, decision, actual);
                }
            }
            AssertCondition::Undecided { txn } => {
                let key = state.key(txn);
                let Some(coordinator) = self.service.coordinator(&key) else {
                    bail!("{} has no live coordinator", txn);
                };
                if let Some(decision) = coordinator.decision() {
                    bail!("expected {} undecided, got {}", txn, decision);
                }
            }
            AssertCondition::CommandsSent {
                participant,
                message_type,
                count,
            } => {
                let actual = self
                    .network
                    .count(&ParticipantId::new(participant), *message_type);
                if actual != *count {
                    bail!(
                        "expected {} {:?} commands to {}, got {}",
                        count,
                        message_type,
                        participant,
                        actual
                    );
                }
            }
            AssertCondition::Finished { txn } => {
                let key = state.key(txn);
                if let Some(s) = self.service.coordinator_state(&key) {
                    bail!("{} still live in state {}", txn, s);
                }
            }
        }

        Ok(())
    }

    /// Coordinator under test.
    pub fn service(&self) -> &TransactionCoordinatorService {
        &self.service
    }

    /// Get simulation metrics.
    pub async fn metrics(&self) -> SimulationMetrics {
        self.metrics.read().await.clone()
    }
}

async fn run_transaction(
    service: Arc<TransactionCoordinatorService>,
    metrics: Arc<RwLock<SimulationMetrics>>,
    key: TransactionKey,
    participants: Vec<ParticipantId>,
    votes: Vec<(bool, Duration)>,
) {
    let started = Instant::now();
    if let Err(e) = service.create_coordinator(key, service.default_deadline()) {
        warn!(error = %e, "Could not start transaction");
        metrics.write().await.record_rejected();
        return;
    }

    let handle = service.coordinate_commit(key, participants.iter().cloned());

    for (participant, (abort, delay)) in participants.into_iter().zip(votes) {
        let service = service.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if abort {
                service.vote_abort(key, participant);
            } else {
                let secs = u32::try_from(now().timestamp()).unwrap_or(u32::MAX);
                service.vote_commit(key, participant, CommitTimestamp::new(secs, 1));
            }
        });
    }

    let decision = handle.wait().await;
    let latency = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    debug!(%key, %decision, latency_ms = latency, "Transaction decided");
    metrics.write().await.record_decision(decision, latency);
}

#[cfg(test)]
mod tests {
    use super::*;
    use txncoord_coordinator::RetryConfig;

    fn controller() -> SimulationController {
        let config = CoordinatorConfig {
            retry: RetryConfig {
                initial_backoff: Duration::from_millis(20),
                max_backoff: Duration::from_millis(100),
                ..RetryConfig::default()
            },
            ..CoordinatorConfig::default()
        };
        let settings = SimulationSettings {
            seed: Some(42),
            ..SimulationSettings::default()
        };
        SimulationController::new(settings, config, &ClientConfig::default())
    }

    #[tokio::test]
    async fn test_builtin_scenarios_pass() {
        for name in Scenario::builtin_names() {
            let controller = controller();
            let scenario = Scenario::load(name).unwrap();
            controller
                .run_scenario(scenario)
                .await
                .unwrap_or_else(|e| panic!("scenario {name}: {e}"));
        }
    }

    #[tokio::test]
    async fn test_failed_assertion_is_reported() {
        let controller = controller();
        let scenario = Scenario {
            name: "wrong".to_string(),
            description: "expects the wrong outcome".to_string(),
            steps: vec![
                ScenarioStep::Create {
                    txn: "t1".to_string(),
                    deadline_ms: None,
                },
                ScenarioStep::VoteAbort {
                    txn: "t1".to_string(),
                    participant: "shard-a".to_string(),
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::Undecided {
                        txn: "t1".to_string(),
                    },
                },
            ],
        };

        let err = controller.run_scenario(scenario).await.unwrap_err();
        assert!(err.to_string().contains("step 3"));
    }

    #[tokio::test]
    async fn test_resolve_fault_scenario() {
        let controller = controller();
        let txn = || "t1".to_string();
        let scenario = Scenario {
            name: "resolve".to_string(),
            description: "fatal rejection is resolved by hand".to_string(),
            steps: vec![
                ScenarioStep::Create {
                    txn: txn(),
                    deadline_ms: None,
                },
                ScenarioStep::Coordinate {
                    txn: txn(),
                    participants: vec!["shard-a".to_string()],
                },
                ScenarioStep::InjectFault {
                    fault_type: FaultType::ShardRejects {
                        reason: "too old".to_string(),
                    },
                    target: "shard-a".to_string(),
                },
                ScenarioStep::VoteCommit {
                    txn: txn(),
                    participant: "shard-a".to_string(),
                    timestamp: 1,
                },
                ScenarioStep::WaitIdle,
                ScenarioStep::ClearFault {
                    target: "shard-a".to_string(),
                },
                ScenarioStep::ResolveFault {
                    txn: txn(),
                    participant: "shard-a".to_string(),
                },
                ScenarioStep::WaitIdle,
                ScenarioStep::Assert {
                    condition: AssertCondition::Finished { txn: txn() },
                },
            ],
        };

        controller.run_scenario(scenario).await.unwrap();
        assert_eq!(controller.service().metrics().fatal_failures, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_continuous_run_decides_transactions() {
        let controller = SimulationController::new(
            SimulationSettings {
                rate: 200.0,
                seed: Some(7),
                failure_probability: 0.1,
                ..SimulationSettings::default()
            },
            CoordinatorConfig {
                retry: RetryConfig {
                    initial_backoff: Duration::from_millis(5),
                    max_backoff: Duration::from_millis(20),
                    ..RetryConfig::default()
                },
                ..CoordinatorConfig::default()
            },
            &ClientConfig::default(),
        );

        controller.run(Some(Duration::from_millis(300))).await.unwrap();

        let metrics = controller.metrics().await;
        assert!(metrics.total_transactions > 0);
        assert_eq!(
            metrics.total_transactions,
            metrics.committed + metrics.aborted
        );
    }
}

//! Simulated participant shards.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use txncoord_common::{CoordinatorError, ParticipantId, Result};
use txncoord_participant::{ParticipantClient, SimulatedParticipantClient};
use txncoord_protocol::ParticipantCommand;

/// Factory for creating shard identities.
pub struct ShardFactory;

impl ShardFactory {
    /// Create `count` shards named `shard-a`, `shard-b`, ...
    ///
    /// Past 26 shards the names continue as `shard-26`, `shard-27`, ...
    pub fn create_shards(count: usize) -> Vec<ParticipantId> {
        (0..count)
            .map(|i| match u8::try_from(i).ok().filter(|i| *i < 26) {
                Some(i) => ParticipantId::new(format!("shard-{}", (b'a' + i) as char)),
                None => ParticipantId::new(format!("shard-{}", i)),
            })
            .collect()
    }
}

/// Network that drops a random share of commands before they reach the
/// simulated shards.
///
/// Dropped commands surface as retryable network errors and are not
/// recorded in the shard history.
pub struct FlakyNetwork {
    inner: SimulatedParticipantClient,
    failure_probability: f64,
    rng: Mutex<StdRng>,
}

impl FlakyNetwork {
    /// Wrap `inner`, dropping each command with `failure_probability`.
    pub fn new(
        inner: SimulatedParticipantClient,
        failure_probability: f64,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Self {
            inner,
            failure_probability: failure_probability.clamp(0.0, 1.0),
            rng: Mutex::new(rng),
        }
    }

    fn should_drop(&self) -> bool {
        self.failure_probability > 0.0 && self.rng.lock().gen_bool(self.failure_probability)
    }
}

#[async_trait]
impl ParticipantClient for FlakyNetwork {
    async fn send_command(
        &self,
        participant: &ParticipantId,
        command: &ParticipantCommand,
    ) -> Result<()> {
        if self.should_drop() {
            trace!(
                participant = %participant,
                command = command.command_name(),
                "Dropping command"
            );
            return Err(CoordinatorError::NetworkError(format!(
                "{} to {} dropped",
                command.command_name(),
                participant
            )));
        }

        self.inner.send_command(participant, command).await
    }
}

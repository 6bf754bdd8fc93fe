//! Demonstration handler that pretends to do heavy work

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use mammoth_durable::queue::WorkItem;
use mammoth_durable::worker::{JobContext, JobHandler, WorkError};

/// How much simulated work one job performs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedWorkConfig {
    /// Fewest rounds of work per job
    pub min_rounds: u32,
    /// Most rounds of work per job
    pub max_rounds: u32,
    /// Shortest pause per round, in milliseconds
    pub min_round_ms: u64,
    /// Longest pause per round, in milliseconds
    pub max_round_ms: u64,
}

impl Default for SimulatedWorkConfig {
    fn default() -> Self {
        Self {
            min_rounds: 1,
            max_rounds: 5,
            min_round_ms: 1_000,
            max_round_ms: 5_000,
        }
    }
}

/// Sleeps through a random number of rounds of random length
pub struct SimulatedWork {
    config: SimulatedWorkConfig,
}

impl SimulatedWork {
    /// Create a new handler; inverted bounds are swapped
    pub fn new(mut config: SimulatedWorkConfig) -> Self {
        if config.min_rounds > config.max_rounds {
            std::mem::swap(&mut config.min_rounds, &mut config.max_rounds);
        }
        if config.min_round_ms > config.max_round_ms {
            std::mem::swap(&mut config.min_round_ms, &mut config.max_round_ms);
        }
        Self { config }
    }

    /// Pick the pauses for one job
    fn plan(&self) -> Vec<Duration> {
        let mut rng = rand::thread_rng();
        let rounds = rng.gen_range(self.config.min_rounds..=self.config.max_rounds);
        (0..rounds)
            .map(|_| {
                Duration::from_millis(
                    rng.gen_range(self.config.min_round_ms..=self.config.max_round_ms),
                )
            })
            .collect()
    }
}

impl Default for SimulatedWork {
    fn default() -> Self {
        Self::new(SimulatedWorkConfig::default())
    }
}

#[async_trait]
impl JobHandler for SimulatedWork {
    async fn execute(&self, ctx: &JobContext, item: &WorkItem) -> Result<(), WorkError> {
        if item.payload.is_null() {
            return Err(WorkError::new(format!("request {} has no payload", item.id))
                .with_type("invalid_payload"));
        }

        let plan = self.plan();
        for (round, pause) in plan.iter().enumerate() {
            info!(
                request_id = item.id,
                job_id = ctx.job_id,
                worker_id = %ctx.worker_id,
                round = round + 1,
                rounds = plan.len(),
                "Doing some heavy work..."
            );
            tokio::time::sleep(*pause).await;
        }

        Ok(())
    }
}

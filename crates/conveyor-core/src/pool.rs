//! Worker pools: the replicas of one stage.
//!
//! Construction and launch are separate steps. [`WorkerPool::new`] holds the
//! built workers without running them; [`WorkerPool::launch`] spawns every
//! replica at once onto the tokio runtime.

use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{QueueName, StageName};
use crate::emit;
use crate::metrics::events::{ReplicaFinished, ReplicaOutcome, StageLaunched};
use crate::worker::Worker;

/// Replica outcome counts for one stage.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub replicas: usize,
    pub completed: usize,
    pub failed: usize,
    pub panicked: usize,
}

impl PoolStats {
    fn record(&mut self, outcome: ReplicaOutcome) {
        match outcome {
            ReplicaOutcome::Completed => self.completed += 1,
            ReplicaOutcome::Failed => self.failed += 1,
            ReplicaOutcome::Panicked => self.panicked += 1,
        }
    }

    pub fn finished(&self) -> usize {
        self.completed + self.failed + self.panicked
    }
}

/// A named group of replicas sharing the same queue wiring.
pub struct WorkerPool {
    stage: StageName,
    consumes: Option<QueueName>,
    produces: Vec<QueueName>,
    pending: Vec<Box<dyn Worker>>,
    running: Vec<JoinHandle<ReplicaOutcome>>,
    launched_at: Option<Instant>,
    stats: PoolStats,
}

impl WorkerPool {
    pub fn new(
        stage: StageName,
        consumes: Option<QueueName>,
        produces: Vec<QueueName>,
        workers: Vec<Box<dyn Worker>>,
    ) -> Self {
        let stats = PoolStats {
            replicas: workers.len(),
            ..PoolStats::default()
        };
        Self {
            stage,
            consumes,
            produces,
            pending: workers,
            running: Vec::new(),
            launched_at: None,
            stats,
        }
    }

    pub fn stage(&self) -> &StageName {
        &self.stage
    }

    pub fn consumes(&self) -> Option<&QueueName> {
        self.consumes.as_ref()
    }

    pub fn produces(&self) -> &[QueueName] {
        &self.produces
    }

    pub fn is_launched(&self) -> bool {
        self.launched_at.is_some()
    }

    /// Time since launch, zero if not yet launched.
    pub fn uptime(&self) -> std::time::Duration {
        self.launched_at
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Spawn every pending replica. Calling it again is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn launch(&mut self) {
        if self.is_launched() {
            return;
        }
        self.launched_at = Some(Instant::now());

        let replicas = self.pending.len();
        for (replica, worker) in self.pending.drain(..).enumerate() {
            let stage = self.stage.clone();
            self.running.push(tokio::spawn(async move {
                match worker.run().await {
                    Ok(()) => {
                        debug!(%stage, replica, "Replica completed");
                        ReplicaOutcome::Completed
                    }
                    Err(err) => {
                        error!(%stage, replica, error = %err, "Replica failed");
                        ReplicaOutcome::Failed
                    }
                }
            }));
        }

        info!(stage = %self.stage, replicas, "Launched worker pool");
        emit!(StageLaunched {
            stage: self.stage.to_string(),
            replicas,
        });
    }

    /// Number of replicas still running.
    pub fn is_alive(&self) -> usize {
        self.running.iter().filter(|h| !h.is_finished()).count()
    }

    /// Drop finished replicas, recording how they ended. Returns the live count.
    pub async fn reap(&mut self) -> usize {
        let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.running)
            .into_iter()
            .partition(|h| h.is_finished());
        self.running = running;

        for handle in finished {
            let outcome = outcome_of(&self.stage, handle).await;
            self.stats.record(outcome);
        }
        self.running.len()
    }

    /// Block until every replica has terminated.
    pub async fn join_all(mut self) -> PoolStats {
        self.launch();
        for handle in std::mem::take(&mut self.running) {
            let outcome = outcome_of(&self.stage, handle).await;
            self.stats.record(outcome);
        }
        self.stats
    }
}

/// Await a finished replica. Takes the stage name rather than the pool so
/// callers hold no borrow of the (non-`Sync`) pool across the await.
async fn outcome_of(stage: &StageName, handle: JoinHandle<ReplicaOutcome>) -> ReplicaOutcome {
    let outcome = match handle.await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(%stage, error = %err, "Replica panicked");
            ReplicaOutcome::Panicked
        }
    };
    emit!(ReplicaFinished {
        stage: stage.to_string(),
        outcome,
    });
    outcome
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("stage", &self.stage)
            .field("consumes", &self.consumes)
            .field("produces", &self.produces)
            .field("pending", &self.pending.len())
            .field("running", &self.running.len())
            .field("stats", &self.stats)
            .finish()
    }
}

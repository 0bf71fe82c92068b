//! Pipeline executor.
//!
//! Drives a [`Topology`] through `Loaded -> QueuesReady -> WorkersLaunched
//! -> Monitoring -> Drained`. While monitoring, every poll interval it reaps
//! each active pool; a pool with no live replicas is retired. Once the last
//! producer of a queue retires, one `DONE` per downstream consumer replica is
//! pushed onto that queue. The run ends when every stage is retired.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use indexmap::{IndexMap, IndexSet};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::{RunReport, StageDef, Topology};
use crate::config::{ExecutionMode, ExecutorConfig, QueueName, StageName, TopologyConfig};
use crate::emit;
use crate::error::{ConfigError, JoinSnafu, PipelineError};
use crate::metrics::events::{
    LiveReplicas, PipelineCompleted, QueueDepth, SentinelsEmitted, StageRetired,
};
use crate::pool::{PoolStats, WorkerPool};
use crate::queue::{QueueHandle, WorkQueue};
use crate::worker::{Registry, RetryPolicy, WorkerParams};

/// Lifecycle of an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Loaded,
    QueuesReady,
    WorkersLaunched,
    Monitoring,
    Drained,
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutorState::Loaded => "loaded",
            ExecutorState::QueuesReady => "queues-ready",
            ExecutorState::WorkersLaunched => "workers-launched",
            ExecutorState::Monitoring => "monitoring",
            ExecutorState::Drained => "drained",
        };
        f.write_str(name)
    }
}

/// Owns one topology's queues and pools for the duration of a run.
pub struct PipelineExecutor {
    topology: Topology,
    registry: Registry,
    settings: ExecutorConfig,
    state: ExecutorState,
    queues: IndexMap<QueueName, QueueHandle>,
    pools: IndexMap<StageName, WorkerPool>,
    stats: IndexMap<StageName, PoolStats>,
    sentinels: IndexMap<QueueName, usize>,
    /// Producer stages per queue that have not retired yet.
    open_producers: HashMap<QueueName, IndexSet<StageName>>,
    retired: Vec<StageName>,
    launched_at: Option<Instant>,
    duration: Duration,
}

impl PipelineExecutor {
    /// Create an executor, checking every stage's class against `registry`.
    pub fn new(
        topology: Topology,
        registry: Registry,
        settings: ExecutorConfig,
    ) -> Result<Self, ConfigError> {
        topology.check_registry(&registry)?;
        Ok(Self {
            topology,
            registry,
            settings,
            state: ExecutorState::Loaded,
            queues: IndexMap::new(),
            pools: IndexMap::new(),
            stats: IndexMap::new(),
            sentinels: IndexMap::new(),
            open_producers: HashMap::new(),
            retired: Vec::new(),
            launched_at: None,
            duration: Duration::ZERO,
        })
    }

    /// Validate `config` and create an executor for it.
    pub fn from_config(config: &TopologyConfig, registry: Registry) -> Result<Self, ConfigError> {
        let topology = Topology::from_config(config)?;
        Self::new(topology, registry, config.executor.clone())
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Live handle to a queue, once queues exist.
    pub fn queue(&self, name: &str) -> Option<&QueueHandle> {
        self.queues.get(name)
    }

    /// Whole lifecycle: build queues, build and launch pools, drive to drain.
    pub async fn run(mut self) -> Result<RunReport, PipelineError> {
        self.initialize_queues()?;
        self.initialize_workers()?;
        self.launch()?;
        match self.settings.mode {
            ExecutionMode::Monitored => self.monitor().await?,
            ExecutionMode::Batch => self.join_all().await?,
        }

        let report = self.report();
        info!(
            duration_secs = report.duration.as_secs_f64(),
            stages = report.stages.len(),
            "Pipeline drained"
        );
        emit!(PipelineCompleted {
            duration: report.duration,
        });
        Ok(report)
    }

    /// Run on a background task.
    pub fn spawn(self) -> RunningPipeline {
        RunningPipeline {
            handle: tokio::spawn(self.run()),
        }
    }

    /// Create one queue per declared queue name.
    pub fn initialize_queues(&mut self) -> Result<(), PipelineError> {
        self.expect_state(ExecutorState::Loaded, "initialize queues")?;
        for name in self.topology.queues() {
            self.queues
                .insert(name.clone(), QueueHandle::new(WorkQueue::new(name.clone())));
            self.sentinels.insert(name.clone(), 0);
            self.open_producers
                .insert(name.clone(), self.topology.producers(name));
        }
        debug!(queues = self.queues.len(), "Queues ready");
        self.state = ExecutorState::QueuesReady;
        Ok(())
    }

    /// Build every stage's pool without starting any replica.
    ///
    /// All factories run before anything is launched, so a rejected stage
    /// aborts the run before any work starts.
    pub fn initialize_workers(&mut self) -> Result<(), PipelineError> {
        self.expect_state(ExecutorState::QueuesReady, "initialize workers")?;
        if !self.pools.is_empty() {
            return Err(PipelineError::InvalidState {
                action: "initialize workers",
                state: format!("{} with workers already built", self.state),
            });
        }

        let mut pools = IndexMap::new();
        for stage in self.topology.stages() {
            pools.insert(stage.name.clone(), self.build_pool(stage)?);
        }
        self.pools = pools;
        Ok(())
    }

    /// Spawn every pool's replicas.
    pub fn launch(&mut self) -> Result<(), PipelineError> {
        self.expect_state(ExecutorState::QueuesReady, "launch")?;
        if self.pools.is_empty() && self.topology.stages().next().is_some() {
            return Err(PipelineError::InvalidState {
                action: "launch",
                state: format!("{} without workers", self.state),
            });
        }

        self.launched_at = Some(Instant::now());
        for pool in self.pools.values_mut() {
            pool.launch();
        }
        self.state = ExecutorState::WorkersLaunched;
        Ok(())
    }

    /// Poll pool liveness until every stage is retired.
    pub async fn monitor(&mut self) -> Result<(), PipelineError> {
        self.expect_state(ExecutorState::WorkersLaunched, "monitor")?;
        self.state = ExecutorState::Monitoring;

        let mut active: Vec<StageName> = self.pools.keys().cloned().collect();
        let mut ticker = tokio::time::interval(self.settings.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !active.is_empty() {
            ticker.tick().await;

            let mut finished = Vec::new();
            for name in &active {
                let Some(pool) = self.pools.get_mut(name) else {
                    continue;
                };
                let live = pool.reap().await;
                emit!(LiveReplicas {
                    stage: name.to_string(),
                    count: live,
                });
                if live == 0 {
                    finished.push(name.clone());
                }
            }

            for name in &finished {
                self.retire(name);
            }
            active.retain(|name| !finished.contains(name));

            for (name, queue) in &self.queues {
                emit!(QueueDepth {
                    queue: name.to_string(),
                    depth: queue.len(),
                });
            }
        }

        self.drain();
        Ok(())
    }

    /// Batch mode: wait for every replica, emitting no sentinels.
    pub async fn join_all(&mut self) -> Result<(), PipelineError> {
        self.expect_state(ExecutorState::WorkersLaunched, "join workers")?;
        for (name, pool) in std::mem::take(&mut self.pools) {
            let stats = pool.join_all().await;
            info!(stage = %name, completed = stats.completed, "Stage joined");
            self.stats.insert(name.clone(), stats);
            self.retired.push(name);
        }
        self.drain();
        Ok(())
    }

    /// Snapshot of the run so far.
    pub fn report(&self) -> RunReport {
        let mut stages = IndexMap::new();
        for stage in self.topology.stages() {
            let stats = self
                .stats
                .get(&stage.name)
                .copied()
                .or_else(|| self.pools.get(&stage.name).map(WorkerPool::stats));
            if let Some(stats) = stats {
                stages.insert(stage.name.clone(), stats);
            }
        }
        RunReport {
            duration: self.duration,
            stages,
            sentinels: self.sentinels.clone(),
            retirement_order: self.retired.clone(),
        }
    }

    fn retire(&mut self, name: &StageName) {
        let Some(pool) = self.pools.get(name) else {
            return;
        };

        for queue in pool.produces() {
            // A queue fed by several stages is closed by the last one to retire.
            let Some(producers) = self.open_producers.get_mut(queue) else {
                continue;
            };
            if !producers.shift_remove(name) {
                continue;
            }
            if !producers.is_empty() {
                debug!(stage = %name, %queue, remaining = producers.len(), "Queue still has live producers");
                continue;
            }

            let consumers = self.topology.consumer_count(queue);
            if consumers == 0 {
                debug!(stage = %name, %queue, "No consumers, queue abandoned");
                continue;
            }
            let Some(handle) = self.queues.get(queue) else {
                continue;
            };
            for _ in 0..consumers {
                handle.push_done();
            }
            *self.sentinels.entry(queue.clone()).or_insert(0) += consumers;
            info!(stage = %name, %queue, sentinels = consumers, "Emitted DONE downstream");
            emit!(SentinelsEmitted {
                queue: queue.to_string(),
                count: consumers,
            });
        }

        let stats = pool.stats();
        info!(
            stage = %name,
            completed = stats.completed,
            failed = stats.failed,
            panicked = stats.panicked,
            "Stage retired"
        );
        emit!(StageRetired {
            stage: name.to_string(),
            lifetime: pool.uptime(),
        });
        self.stats.insert(name.clone(), stats);
        self.retired.push(name.clone());
    }

    fn drain(&mut self) {
        self.duration = self
            .launched_at
            .map(|at| at.elapsed())
            .unwrap_or_default();
        self.state = ExecutorState::Drained;
    }

    fn build_pool(&self, stage: &StageDef) -> Result<WorkerPool, ConfigError> {
        let input_queue = stage
            .input_queue
            .as_ref()
            .map(|queue| self.queue_handle(stage, queue))
            .transpose()?;
        let output_queues = stage
            .output_queues
            .iter()
            .map(|queue| self.queue_handle(stage, queue))
            .collect::<Result<Vec<_>, _>>()?;
        let retry = RetryPolicy::from(&self.settings.retry);

        if let Some(location) = &stage.location {
            debug!(stage = %stage.name, %location, class = %stage.class, "Resolving worker");
        }

        let workers = (0..stage.instances)
            .map(|replica| {
                let params = WorkerParams {
                    stage: stage.name.clone(),
                    replica,
                    input_queue: input_queue.clone(),
                    output_queue: output_queues.first().cloned(),
                    output_queues: output_queues.clone(),
                    input_values: stage.values_for(replica),
                    params: stage.params.clone(),
                    pop_timeout: self.settings.pop_timeout(),
                    retry,
                    fan_out: self.settings.fan_out,
                };
                self.registry.create(&stage.class, params)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(WorkerPool::new(
            stage.name.clone(),
            stage.input_queue.clone(),
            stage.output_queues.clone(),
            workers,
        ))
    }

    fn queue_handle(&self, stage: &StageDef, queue: &QueueName) -> Result<QueueHandle, ConfigError> {
        self.queues
            .get(queue)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownQueue {
                stage: stage.name.to_string(),
                queue: queue.to_string(),
            })
    }

    fn expect_state(&self, expected: ExecutorState, action: &'static str) -> Result<(), PipelineError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(PipelineError::InvalidState {
                action,
                state: self.state.to_string(),
            })
        }
    }
}

impl fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("state", &self.state)
            .field("queues", &self.queues.keys().collect::<Vec<_>>())
            .field("pools", &self.pools.keys().collect::<Vec<_>>())
            .field("retired", &self.retired)
            .finish()
    }
}

/// A pipeline executing on a background task.
#[derive(Debug)]
pub struct RunningPipeline {
    handle: JoinHandle<Result<RunReport, PipelineError>>,
}

impl RunningPipeline {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the pipeline to drain.
    pub async fn wait(self) -> Result<RunReport, PipelineError> {
        use snafu::ResultExt;
        self.handle.await.context(JoinSnafu)?
    }
}

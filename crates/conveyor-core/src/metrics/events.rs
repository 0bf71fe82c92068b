//! Internal events for pipeline metrics emission.
//!
//! Each struct represents a measurable occurrence in a pipeline run and
//! records the matching metric through the `metrics` facade. Without an
//! installed recorder the calls are no-ops.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    fn emit(self);
}

/// A stage's pool was launched.
pub struct StageLaunched {
    pub stage: String,
    pub replicas: usize,
}

impl InternalEvent for StageLaunched {
    fn emit(self) {
        trace!(stage = %self.stage, replicas = self.replicas, "Stage launched");
        counter!("conveyor_replicas_launched_total", "stage" => self.stage)
            .increment(self.replicas as u64);
    }
}

/// Live replica count observed by the monitor.
pub struct LiveReplicas {
    pub stage: String,
    pub count: usize,
}

impl InternalEvent for LiveReplicas {
    fn emit(self) {
        gauge!("conveyor_live_replicas", "stage" => self.stage).set(self.count as f64);
    }
}

/// How a replica ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaOutcome {
    Completed,
    Failed,
    Panicked,
}

impl ReplicaOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicaOutcome::Completed => "completed",
            ReplicaOutcome::Failed => "failed",
            ReplicaOutcome::Panicked => "panicked",
        }
    }
}

/// A replica terminated.
pub struct ReplicaFinished {
    pub stage: String,
    pub outcome: ReplicaOutcome,
}

impl InternalEvent for ReplicaFinished {
    fn emit(self) {
        trace!(stage = %self.stage, outcome = self.outcome.as_str(), "Replica finished");
        counter!(
            "conveyor_replicas_finished_total",
            "stage" => self.stage,
            "outcome" => self.outcome.as_str()
        )
        .increment(1);
    }
}

/// A stage had no live replicas left and was retired.
pub struct StageRetired {
    pub stage: String,
    pub lifetime: Duration,
}

impl InternalEvent for StageRetired {
    fn emit(self) {
        trace!(stage = %self.stage, lifetime = ?self.lifetime, "Stage retired");
        counter!("conveyor_stages_retired_total").increment(1);
        histogram!("conveyor_stage_lifetime_seconds", "stage" => self.stage)
            .record(self.lifetime.as_secs_f64());
    }
}

/// Sentinels pushed to a queue on behalf of a retired producer.
pub struct SentinelsEmitted {
    pub queue: String,
    pub count: usize,
}

impl InternalEvent for SentinelsEmitted {
    fn emit(self) {
        trace!(queue = %self.queue, count = self.count, "Sentinels emitted");
        counter!("conveyor_sentinels_emitted_total", "queue" => self.queue)
            .increment(self.count as u64);
    }
}

/// Current depth of a queue, sampled by the monitor.
pub struct QueueDepth {
    pub queue: String,
    pub depth: usize,
}

impl InternalEvent for QueueDepth {
    fn emit(self) {
        gauge!("conveyor_queue_depth", "queue" => self.queue).set(self.depth as f64);
    }
}

/// A polling worker consumed a unit of work.
pub struct ItemConsumed {
    pub stage: String,
}

impl InternalEvent for ItemConsumed {
    fn emit(self) {
        counter!("conveyor_items_consumed_total", "stage" => self.stage).increment(1);
    }
}

/// A worker pushed values downstream.
pub struct ItemsProduced {
    pub stage: String,
    pub count: usize,
}

impl InternalEvent for ItemsProduced {
    fn emit(self) {
        counter!("conveyor_items_produced_total", "stage" => self.stage)
            .increment(self.count as u64);
    }
}

/// A unit of work failed (after retries, for transient failures).
pub struct WorkFailed {
    pub stage: String,
    pub kind: &'static str,
}

impl InternalEvent for WorkFailed {
    fn emit(self) {
        trace!(stage = %self.stage, kind = self.kind, "Work failed");
        counter!("conveyor_work_failures_total", "stage" => self.stage, "kind" => self.kind)
            .increment(1);
    }
}

/// A transient failure is being retried.
pub struct WorkRetried {
    pub stage: String,
    pub attempt: u32,
}

impl InternalEvent for WorkRetried {
    fn emit(self) {
        trace!(stage = %self.stage, attempt = self.attempt, "Work retried");
        counter!("conveyor_work_retries_total", "stage" => self.stage).increment(1);
    }
}

/// Wall-clock duration of a completed pipeline run.
pub struct PipelineCompleted {
    pub duration: Duration,
}

impl InternalEvent for PipelineCompleted {
    fn emit(self) {
        trace!(duration = ?self.duration, "Pipeline completed");
        histogram!("conveyor_pipeline_duration_seconds").record(self.duration.as_secs_f64());
    }
}

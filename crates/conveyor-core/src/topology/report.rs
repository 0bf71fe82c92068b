//! Summary of a finished pipeline run.

use std::time::Duration;

use indexmap::IndexMap;

use crate::config::{QueueName, StageName};
use crate::pool::PoolStats;

/// What happened during one run, collected by the executor.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Wall-clock time from launch to drain.
    pub duration: Duration,
    /// Replica outcomes per stage, in declaration order.
    pub stages: IndexMap<StageName, PoolStats>,
    /// `DONE` sentinels pushed per queue. Every declared queue is present.
    pub sentinels: IndexMap<QueueName, usize>,
    /// Stages in the order they were retired.
    pub retirement_order: Vec<StageName>,
}

impl RunReport {
    pub fn sentinels_for(&self, queue: &str) -> usize {
        self.sentinels.get(queue).copied().unwrap_or(0)
    }

    pub fn stage(&self, stage: &str) -> Option<&PoolStats> {
        self.stages.get(stage)
    }

    /// Position of `stage` in the retirement order.
    pub fn retired_at(&self, stage: &str) -> Option<usize> {
        self.retirement_order.iter().position(|s| s.id() == stage)
    }

    /// Replicas that returned an error or panicked.
    pub fn unsuccessful_replicas(&self) -> usize {
        self.stages.values().map(|s| s.failed + s.panicked).sum()
    }
}

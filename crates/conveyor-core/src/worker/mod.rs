//! The worker contract.
//!
//! A worker is constructed by a factory from [`WorkerParams`] (no side
//! effects) and later driven to completion by its pool via [`Worker::run`].
//! Two shapes are supported:
//!
//! - one-shot workers process the static values dealt to their replica and
//!   return;
//! - polling consumers drain their input queue until they receive a `DONE`
//!   sentinel (see [`run_consumer_loop`]).

mod consumer;
mod registry;
mod retry;

pub use consumer::{Consumer, ConsumerStats, run_consumer_loop};
pub use registry::{Registry, WorkerFactory};
pub use retry::RetryPolicy;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::StageName;
use crate::emit;
use crate::error::WorkError;
use crate::metrics::events::ItemsProduced;
use crate::queue::{Payload, QueueHandle};

/// A unit of execution inside a stage's pool.
#[async_trait]
pub trait Worker: Send {
    /// Run to completion.
    ///
    /// Errors are recorded against the replica and never reach the executor
    /// or sibling replicas.
    async fn run(self: Box<Self>) -> Result<(), WorkError>;
}

/// Everything the executor hands a factory when building one replica.
#[derive(Debug, Clone)]
pub struct WorkerParams {
    pub stage: StageName,
    /// Zero-based replica index within the stage.
    pub replica: usize,
    pub input_queue: Option<QueueHandle>,
    /// First declared output queue.
    pub output_queue: Option<QueueHandle>,
    /// All declared output queues, in declaration order.
    pub output_queues: Vec<QueueHandle>,
    /// This replica's share of the stage's static values, if any were declared.
    pub input_values: Option<Vec<Value>>,
    pub params: Map<String, Value>,
    pub pop_timeout: Duration,
    pub retry: RetryPolicy,
    pub fan_out: bool,
}

impl WorkerParams {
    /// Name used in logs: `Stage#replica`.
    pub fn label(&self) -> String {
        format!("{}#{}", self.stage, self.replica)
    }

    /// Handle for pushing derived values downstream.
    pub fn emitter(&self) -> Emitter {
        let targets = if self.fan_out {
            self.output_queues.clone()
        } else {
            self.output_queue.iter().cloned().collect()
        };
        Emitter {
            stage: self.stage.clone(),
            targets,
        }
    }

    /// This replica's static values, empty when none were dealt to it.
    pub fn values(&self) -> &[Value] {
        self.input_values.as_deref().unwrap_or_default()
    }

    /// Look up a required string parameter.
    pub fn require_str(&self, key: &str) -> Result<&str, String> {
        match self.params.get(key) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(format!("parameter '{key}' must be a string, got {other}")),
            None => Err(format!("missing required parameter '{key}'")),
        }
    }
}

/// Pushes values to a worker's output queue(s).
#[derive(Debug, Clone)]
pub struct Emitter {
    stage: StageName,
    targets: Vec<QueueHandle>,
}

impl Emitter {
    /// Push `value` downstream. A sink has no targets and drops it.
    pub fn emit(&self, value: Payload) {
        let Some((last, rest)) = self.targets.split_last() else {
            return;
        };
        for queue in rest {
            queue.push_item(value.clone());
        }
        last.push_item(value);
        emit!(ItemsProduced {
            stage: self.stage.to_string(),
            count: self.targets.len(),
        });
    }

    pub fn is_sink(&self) -> bool {
        self.targets.is_empty()
    }
}

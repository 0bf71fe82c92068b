//! conveyor-core: a declarative, queue-connected worker pipeline runtime.
//!
//! - `config/` - Topology file types, loading and environment variable interpolation
//! - `topology/` - Graph validation and the executor that drives a run to completion
//! - `worker/` - Worker contract, factory registry, consumer loop and retry policy
//! - `pool` - Replica groups with liveness tracking
//! - `queue` - Thread-safe FIFO with the `DONE` sentinel
//! - `metrics/` - Prometheus metrics infrastructure
//! - `error` - Error types
//! - `app` - Application abstraction for reducing main.rs boilerplate

pub mod app;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod topology;
pub mod tracing;
pub mod worker;

// Re-export commonly used items
pub use app::{Application, run_topology};
pub use config::{
    CliArgs, ExecutionMode, ExecutorConfig, MetricsConfig, QueueName, StageName, TopologyConfig,
    load_file, parse_yaml,
};
pub use error::{ConfigError, MetricsError, PipelineError, QueueTimeout, WorkError};
pub use pool::{PoolStats, WorkerPool};
pub use queue::{Message, Payload, QueueHandle, WorkQueue};
pub use topology::{
    ExecutorState, PipelineExecutor, RunReport, RunningPipeline, StageDef, Topology,
};
pub use self::tracing::init_tracing;
pub use worker::{
    Consumer, ConsumerStats, Emitter, Registry, RetryPolicy, Worker, WorkerFactory, WorkerParams,
    run_consumer_loop,
};

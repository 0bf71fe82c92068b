//! Declarative topology configuration.
//!
//! A topology file names the queues, the worker stages wired between them
//! and how many replicas each stage runs:
//!
//! ```yaml
//! queues:
//!   - name: SymbolQueue
//! workers:
//!   - name: Fetch
//!     class: StaticSource
//!     output_queues: [SymbolQueue]
//!     instances: 3
//!     input_values: [A, B, C]
//! ```

mod key;
mod loader;
mod path;
mod vars;

pub use key::{QueueName, StageName};
pub use loader::{load_file, parse_yaml};
pub use path::{CliArgs, is_yaml_file};
pub use vars::{InterpolationResult, Unresolved, interpolate};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::worker::RetryPolicy;

/// Root of a topology file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologyConfig {
    /// Declared work queues.
    #[serde(default)]
    pub queues: Vec<QueueConfig>,
    /// Worker stages, in declaration order.
    #[serde(default)]
    pub workers: Vec<StageConfig>,
    /// Executor tuning.
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Optional Prometheus endpoint.
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
}

/// A single queue declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    pub name: QueueName,
}

/// A single worker stage declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    pub name: StageName,
    /// Informational module/package of the implementation.
    #[serde(default)]
    pub location: Option<String>,
    /// Registry key of the implementation.
    pub class: String,
    /// Queue this stage drains. Absent for source stages.
    #[serde(default)]
    pub input_queue: Option<QueueName>,
    /// Queues this stage feeds. Empty for sink stages.
    #[serde(default)]
    pub output_queues: Vec<QueueName>,
    /// Number of concurrently running replicas.
    #[serde(default = "default_instances")]
    pub instances: usize,
    /// Static values dealt to the replicas of a source stage.
    #[serde(default)]
    pub input_values: Option<Vec<Value>>,
    /// Free-form parameters handed to the worker factory.
    #[serde(default)]
    pub params: Map<String, Value>,
}

fn default_instances() -> usize {
    1
}

/// How the executor drives the launched pools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Poll liveness and propagate `DONE` sentinels downstream.
    #[default]
    Monitored,
    /// Join every replica. No sentinels, so no stage may consume a queue.
    Batch,
}

/// Executor tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Interval between liveness checks (default: 1000ms).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Blocking pop timeout handed to polling workers (default: 500ms).
    #[serde(default = "default_pop_timeout_ms")]
    pub pop_timeout_ms: u64,
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Emit to every output queue rather than only the first.
    #[serde(default)]
    pub fan_out: bool,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            pop_timeout_ms: default_pop_timeout_ms(),
            mode: ExecutionMode::default(),
            fan_out: false,
            retry: RetryConfig::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms.max(1))
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_pop_timeout_ms() -> u64 {
    500
}

/// Bounded exponential backoff for transient work failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts including the first (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy::new(
            config.max_attempts,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5000
}

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Address to bind the exporter (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_defaults() {
        let yaml = r#"
queues:
  - name: SymbolQueue
workers:
  - name: Price
    class: Stamp
    input_queue: SymbolQueue
"#;
        let config = parse_yaml(yaml).unwrap();
        let stage = &config.workers[0];
        assert_eq!(stage.instances, 1);
        assert!(stage.output_queues.is_empty());
        assert!(stage.input_values.is_none());
        assert!(stage.params.is_empty());
        assert_eq!(config.executor.poll_interval_ms, 1000);
        assert_eq!(config.executor.mode, ExecutionMode::Monitored);
        assert!(config.metrics.is_none());
    }

    #[test]
    fn test_full_stage() {
        let yaml = r#"
queues:
  - name: SymbolQueue
workers:
  - name: Fetch
    location: workers.source
    class: StaticSource
    output_queues: [SymbolQueue]
    instances: 3
    input_values: [A, B, 7]
    params:
      label: fetch
executor:
  poll_interval_ms: 50
  mode: batch
  fan_out: true
  retry:
    max_attempts: 5
"#;
        let config = parse_yaml(yaml).unwrap();
        let stage = &config.workers[0];
        assert_eq!(stage.location.as_deref(), Some("workers.source"));
        assert_eq!(stage.instances, 3);
        assert_eq!(
            stage.input_values.as_deref(),
            Some(&[Value::from("A"), Value::from("B"), Value::from(7)][..])
        );
        assert_eq!(stage.params.get("label"), Some(&Value::from("fetch")));
        assert_eq!(config.executor.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.executor.mode, ExecutionMode::Batch);
        assert!(config.executor.fan_out);
        assert_eq!(config.executor.retry.max_attempts, 5);
        assert_eq!(config.executor.retry.initial_backoff_ms, 100);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = r#"
workers:
  - name: Fetch
    class: StaticSource
    replicas: 2
"#;
        assert!(parse_yaml(yaml).is_err());
    }
}

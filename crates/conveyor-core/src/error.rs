//! Error types for the pipeline runtime.
//!
//! Configuration errors are fatal and reported before any work starts.
//! Work errors stay local to one replica: transient ones are retried,
//! permanent ones are logged and the unit of work is abandoned.

use std::time::Duration;

use snafu::prelude::*;

// ============ Config Errors ============

/// Errors that can occur while loading and validating a topology.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to read the topology file.
    #[snafu(display("Failed to read topology file {}: {source}", path.display()))]
    ReadFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// Unsupported topology file format.
    #[snafu(display("Unsupported topology format for {}: only .yaml/.yml supported", path.display()))]
    UnsupportedFormat { path: std::path::PathBuf },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// A queue or stage was declared with an empty name.
    #[snafu(display("{kind} name cannot be empty"))]
    EmptyName { kind: &'static str },

    /// The same queue name was declared twice.
    #[snafu(display("Queue '{queue}' is declared more than once"))]
    DuplicateQueue { queue: String },

    /// The same stage name was declared twice.
    #[snafu(display("Stage '{stage}' is declared more than once"))]
    DuplicateStage { stage: String },

    /// A stage asked for zero replicas.
    #[snafu(display("Stage '{stage}' must declare at least one instance"))]
    ZeroInstances { stage: String },

    /// A stage references a queue that was never declared.
    #[snafu(display("Stage '{stage}' references undeclared queue '{queue}'"))]
    UnknownQueue { stage: String, queue: String },

    /// A queue is drained by some stage but filled by none.
    #[snafu(display(
        "Queue '{queue}' is consumed by {} but no stage produces it",
        consumers.join(", ")
    ))]
    UnproducedQueue {
        queue: String,
        consumers: Vec<String>,
    },

    /// The stage graph contains a cycle.
    #[snafu(display("Stage graph contains a cycle: {}", stages.join(" -> ")))]
    Cycle { stages: Vec<String> },

    /// No factory registered for the requested implementation.
    #[snafu(display("Stage '{stage}' references unknown worker class '{class}'"))]
    UnknownImplementation { stage: String, class: String },

    /// A factory rejected the parameters it was handed.
    #[snafu(display("Stage '{stage}' has invalid parameters: {message}"))]
    InvalidParams { stage: String, message: String },

    /// Batch mode cannot drive stages that poll an input queue.
    #[snafu(display(
        "Stage '{stage}' consumes queue '{queue}', which batch mode cannot terminate"
    ))]
    BatchConsumer { stage: String, queue: String },

    /// Multiple configuration errors occurred.
    #[snafu(display("Multiple config errors:\n{}", errors.join("\n")))]
    MultipleErrors { errors: Vec<String> },
}

impl ConfigError {
    /// Collapse a list of errors into one, keeping a lone error as-is.
    pub fn from_many(mut errors: Vec<ConfigError>) -> Result<(), ConfigError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleErrors {
                errors: errors.iter().map(ToString::to_string).collect(),
            }),
        }
    }
}

// ============ Work Errors ============

/// Failure of a single unit of work inside a replica.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WorkError {
    /// Network failure, rate limiting, interrupted I/O. Worth retrying.
    #[snafu(display("transient failure: {message}"))]
    Transient { message: String },

    /// Malformed payload, missing field, invalid conversion. Retrying won't help.
    #[snafu(display("permanent failure: {message}"))]
    Permanent { message: String },
}

impl WorkError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::Permanent { .. } => "permanent",
        }
    }
}

impl From<std::io::Error> for WorkError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused => Self::transient(err.to_string()),
            _ => Self::permanent(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for WorkError {
    fn from(err: serde_json::Error) -> Self {
        Self::permanent(err.to_string())
    }
}

// ============ Queue Errors ============

/// A blocking pop found nothing within its timeout. Expected; callers check again.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[snafu(display("no message on queue '{queue}' within {waited:?}"))]
pub struct QueueTimeout {
    pub queue: String,
    pub waited: Duration,
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to parse the listen address.
    #[snafu(display("Failed to parse metrics address: {source}"))]
    AddressParse { source: std::net::AddrParseError },

    /// Failed to initialize the Prometheus exporter.
    #[snafu(display("Failed to initialize Prometheus exporter: {source}"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Pipeline Errors ============

/// Errors that stop a pipeline run before it reaches its monitoring phase.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Topology or worker configuration was rejected.
    #[snafu(display("Invalid configuration: {source}"))]
    Config { source: ConfigError },

    /// Metrics exporter could not be installed.
    #[snafu(display("Failed to initialize metrics: {source}"))]
    Metrics { source: MetricsError },

    /// An executor phase was invoked out of order.
    #[snafu(display("Cannot {action} while executor is {state}"))]
    InvalidState { action: &'static str, state: String },

    /// The background task driving the executor died.
    #[snafu(display("Executor task failed: {source}"))]
    Join { source: tokio::task::JoinError },
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        Self::Config { source }
    }
}

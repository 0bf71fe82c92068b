//! conveyor: declarative queue-connected worker pipelines.
//!
//! Ships the `conveyor` binary and a set of built-in worker classes:
//! - `workers/` - One-shot and polling workers registered under their class names

pub mod workers;

pub use workers::{builtin_registry, register_builtins};

// Re-export from conveyor-core
pub use conveyor_core::{
    Application, PipelineExecutor, Registry, RunReport, TopologyConfig, init_tracing, load_file,
    parse_yaml, run_topology,
};

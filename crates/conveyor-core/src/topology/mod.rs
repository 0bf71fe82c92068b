//! Pipeline graph and the executor that runs it.

mod executor;
mod graph;
mod report;

pub use executor::{ExecutorState, PipelineExecutor, RunningPipeline};
pub use graph::{StageDef, Topology};
pub use report::RunReport;

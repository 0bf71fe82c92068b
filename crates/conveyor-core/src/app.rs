//! Application entry point shared by binaries.
//!
//! A binary builds a [`Registry`] of the worker classes it ships and hands it
//! to [`Application::run`], which takes care of tracing, argument parsing,
//! config loading and driving the executor to completion.

use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use snafu::ResultExt;
use tracing::{error, info};

use crate::config::{CliArgs, TopologyConfig, load_file};
use crate::error::{ConfigError, MetricsSnafu, PipelineError};
use crate::topology::{PipelineExecutor, RunReport};
use crate::tracing::init_tracing;
use crate::worker::Registry;

/// Validate `config`, start the metrics exporter if configured, and run the
/// pipeline until every stage has drained.
pub async fn run_topology(
    config: &TopologyConfig,
    registry: Registry,
) -> Result<RunReport, PipelineError> {
    let executor = PipelineExecutor::from_config(config, registry)?;
    if let Some(metrics) = &config.metrics {
        crate::metrics::init(&metrics.address).context(MetricsSnafu)?;
    }
    executor.run().await
}

/// A loaded topology paired with the worker classes that can run it.
#[derive(Debug)]
pub struct Application {
    config: TopologyConfig,
    registry: Registry,
}

impl Application {
    /// Full application lifecycle: parse args, load config, run the pipeline.
    ///
    /// 1. Initialize tracing
    /// 2. Parse CLI arguments
    /// 3. Load and validate configuration
    /// 4. Run the pipeline on a multi-threaded runtime
    pub fn run(registry: Registry) -> ExitCode {
        init_tracing();

        let args = CliArgs::parse();
        info!(path = %args.config.display(), "Loading topology");

        match Self::from_path(&args.config, registry) {
            Ok(app) => app.execute(),
            Err(e) => {
                eprintln!("Failed to load config: {e}");
                ExitCode::FAILURE
            }
        }
    }

    /// Load a topology file (useful for testing).
    pub fn from_path(path: &Path, registry: Registry) -> Result<Self, ConfigError> {
        let config = load_file(path)?;
        Ok(Self { config, registry })
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    fn log_startup_info(&self) {
        info!(
            queues = self.config.queues.len(),
            stages = self.config.workers.len(),
            "Starting pipeline"
        );
        for stage in &self.config.workers {
            info!(
                stage = %stage.name,
                class = %stage.class,
                instances = stage.instances,
                "  - stage"
            );
        }
    }

    fn execute(self) -> ExitCode {
        self.log_startup_info();

        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                eprintln!("Failed to start runtime: {e}");
                return ExitCode::FAILURE;
            }
        };

        let started = Instant::now();
        let result = runtime.block_on(run_topology(&self.config, self.registry));
        info!("Finished in {:.3} seconds", started.elapsed().as_secs_f64());

        match result {
            Ok(report) => {
                let unsuccessful = report.unsuccessful_replicas();
                if unsuccessful > 0 {
                    error!(replicas = unsuccessful, "Some replicas did not complete");
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Pipeline failed: {e}");
                ExitCode::FAILURE
            }
        }
    }
}

use std::time::Duration;

use async_trait::async_trait;
use conveyor_core::{WorkError, Worker, WorkerParams};
use serde_json::Value;
use tracing::debug;

/// Sleeps for each assigned value, in seconds.
pub struct Sleepy {
    params: WorkerParams,
}

impl Sleepy {
    pub fn new(params: WorkerParams) -> Self {
        Self { params }
    }
}

fn seconds(value: &Value) -> Result<Duration, WorkError> {
    value
        .as_f64()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
        .ok_or_else(|| WorkError::permanent(format!("not a duration in seconds: {value}")))
}

#[async_trait]
impl Worker for Sleepy {
    async fn run(self: Box<Self>) -> Result<(), WorkError> {
        let label = self.params.label();
        for value in self.params.values() {
            let duration = seconds(value)?;
            debug!(worker = %label, ?duration, "Sleeping");
            tokio::time::sleep(duration).await;
        }
        Ok(())
    }
}

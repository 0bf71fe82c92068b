use async_trait::async_trait;
use conveyor_core::{WorkError, Worker, WorkerParams};
use tracing::debug;

/// Emits each assigned value downstream unchanged.
pub struct StaticSource {
    params: WorkerParams,
}

impl StaticSource {
    pub fn new(params: WorkerParams) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Worker for StaticSource {
    async fn run(self: Box<Self>) -> Result<(), WorkError> {
        let emitter = self.params.emitter();
        let values = self.params.values();
        for value in values {
            emitter.emit(value.clone());
        }
        debug!(worker = %self.params.label(), emitted = values.len(), "Source exhausted");
        Ok(())
    }
}

use async_trait::async_trait;
use conveyor_core::{Consumer, Payload, WorkError, WorkerParams};
use tracing::info;

/// Logs every item it receives.
pub struct LogSink {
    label: String,
    seen: usize,
}

impl LogSink {
    pub fn new(params: &WorkerParams) -> Self {
        Self {
            label: params.label(),
            seen: 0,
        }
    }
}

#[async_trait]
impl Consumer for LogSink {
    async fn consume(&mut self, item: &Payload) -> Result<Option<Payload>, WorkError> {
        self.seen += 1;
        info!(worker = %self.label, %item, "Received");
        Ok(None)
    }

    async fn finish(&mut self) -> Result<(), WorkError> {
        info!(worker = %self.label, items = self.seen, "Sink drained");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::tests::{params, queue};
    use conveyor_core::run_consumer_loop;
    use serde_json::json;

    #[tokio::test]
    async fn test_drains_until_done() {
        let input = queue("PriceQueue");
        input.push_item(json!(1));
        input.push_item(json!(2));
        input.push_done();

        let params = params("Store", Some(&input), None, None, json!({}));
        let mut sink = LogSink::new(&params);
        let stats = run_consumer_loop(&mut sink, &params).await.unwrap();

        assert_eq!(stats.consumed, 2);
        assert_eq!(stats.produced, 0);
        assert_eq!(sink.seen, 2);
        assert!(input.is_empty());
    }
}

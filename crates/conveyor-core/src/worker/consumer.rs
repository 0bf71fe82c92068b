//! Polling consumer loop.
//!
//! Drains an input queue until the first `DONE` sentinel. The loop never
//! forwards `DONE` downstream: the executor emits exactly one sentinel per
//! downstream replica once this stage's pool has fully terminated.

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use super::{Emitter, RetryPolicy};
use crate::emit;
use crate::error::WorkError;
use crate::metrics::events::{ItemConsumed, WorkFailed};
use crate::queue::{Message, Payload};
use crate::worker::WorkerParams;

/// Per-item processing for a polling worker.
#[async_trait]
pub trait Consumer: Send {
    /// Process one unit of work, optionally deriving a value to push downstream.
    async fn consume(&mut self, item: &Payload) -> Result<Option<Payload>, WorkError>;

    /// Called once after `DONE`, to flush or release local resources.
    async fn finish(&mut self) -> Result<(), WorkError> {
        Ok(())
    }
}

/// Summary of one consumer loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub consumed: usize,
    pub produced: usize,
    pub failed: usize,
}

/// Drive `consumer` against the input queue in `params`.
///
/// Transient failures are retried with the stage's retry policy; failures
/// that survive retrying are logged and the item is abandoned.
pub async fn run_consumer_loop<C: Consumer>(
    consumer: &mut C,
    params: &WorkerParams,
) -> Result<ConsumerStats, WorkError> {
    let Some(input) = params.input_queue.as_ref() else {
        return Err(WorkError::permanent(format!(
            "stage '{}' has no input queue to poll",
            params.stage
        )));
    };
    let label = params.label();
    let emitter: Emitter = params.emitter();
    let retry: RetryPolicy = params.retry;
    let mut stats = ConsumerStats::default();

    loop {
        let item = match input.pop(params.pop_timeout).await {
            Ok(Message::Item(item)) => item,
            Ok(Message::Done) => {
                debug!(worker = %label, queue = %input.name(), "Received DONE");
                break;
            }
            Err(timeout) => {
                trace!(worker = %label, %timeout, "Idle, polling again");
                continue;
            }
        };

        stats.consumed += 1;
        emit!(ItemConsumed {
            stage: params.stage.to_string(),
        });

        let mut attempt = 1;
        let outcome = loop {
            match consumer.consume(&item).await {
                Err(err) => match retry.retry_delay(params.stage.id(), attempt, &err) {
                    Some(delay) => {
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => break Err(err),
                },
                done => break done,
            }
        };

        match outcome {
            Ok(Some(derived)) => {
                emitter.emit(derived);
                stats.produced += 1;
            }
            Ok(None) => {}
            Err(err) => {
                stats.failed += 1;
                warn!(worker = %label, error = %err, %item, "Abandoning unit of work");
                emit!(WorkFailed {
                    stage: params.stage.to_string(),
                    kind: err.kind(),
                });
            }
        }
    }

    consumer.finish().await?;
    debug!(
        worker = %label,
        consumed = stats.consumed,
        produced = stats.produced,
        failed = stats.failed,
        "Consumer finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueName;
    use crate::queue::WorkQueue;
    use crate::worker::tests::params_for;
    use serde_json::Value;
    use std::sync::Arc;

    struct Doubler {
        finished: bool,
        flaky_left: u32,
    }

    #[async_trait]
    impl Consumer for Doubler {
        async fn consume(&mut self, item: &Payload) -> Result<Option<Payload>, WorkError> {
            if self.flaky_left > 0 {
                self.flaky_left -= 1;
                return Err(WorkError::transient("try again"));
            }
            let n = item
                .as_i64()
                .ok_or_else(|| WorkError::permanent(format!("not a number: {item}")))?;
            Ok(Some(Value::from(n * 2)))
        }

        async fn finish(&mut self) -> Result<(), WorkError> {
            self.finished = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_drains_until_done() {
        let input = Arc::new(WorkQueue::new(QueueName::new("In")));
        let output = Arc::new(WorkQueue::new(QueueName::new("Out")));
        let mut params = params_for("Double");
        params.input_queue = Some(input.clone());
        params.output_queue = Some(output.clone());
        params.output_queues = vec![output.clone()];

        input.push_item(Value::from(1));
        input.push_item(Value::from("oops"));
        input.push_item(Value::from(3));
        input.push_done();
        input.push_item(Value::from(99));

        let mut consumer = Doubler {
            finished: false,
            flaky_left: 1,
        };
        let stats = run_consumer_loop(&mut consumer, &params).await.unwrap();

        assert_eq!(
            stats,
            ConsumerStats {
                consumed: 3,
                produced: 2,
                failed: 1
            }
        );
        assert!(consumer.finished);
        assert_eq!(output.try_pop(), Some(Message::Item(Value::from(2))));
        assert_eq!(output.try_pop(), Some(Message::Item(Value::from(6))));
        // Nothing past the sentinel is touched and DONE is not forwarded.
        assert_eq!(input.len(), 1);
        assert_eq!(output.sentinels_pushed(), 0);
    }

    #[tokio::test]
    async fn test_missing_input_queue() {
        let params = params_for("Double");
        let mut consumer = Doubler {
            finished: false,
            flaky_left: 0,
        };
        let err = run_consumer_loop(&mut consumer, &params).await.unwrap_err();
        assert!(!err.is_transient());
    }
}

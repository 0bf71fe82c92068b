use async_trait::async_trait;
use conveyor_core::{WorkError, Worker, WorkerParams};
use serde_json::{Value, json};
use tracing::info;

/// Computes `sum(i * i for i in 0..n)` for each assigned `n` on the blocking
/// pool and emits `{n, sum_of_squares}`.
pub struct SquaredSum {
    params: WorkerParams,
}

impl SquaredSum {
    pub fn new(params: WorkerParams) -> Self {
        Self { params }
    }
}

pub(crate) fn sum_of_squares(n: u64) -> Option<u64> {
    (0..n).try_fold(0u64, |acc, i| i.checked_mul(i).and_then(|sq| acc.checked_add(sq)))
}

#[async_trait]
impl Worker for SquaredSum {
    async fn run(self: Box<Self>) -> Result<(), WorkError> {
        let label = self.params.label();
        let emitter = self.params.emitter();

        for value in self.params.values() {
            let n = value
                .as_u64()
                .ok_or_else(|| WorkError::permanent(format!("not a non-negative integer: {value}")))?;
            let sum = tokio::task::spawn_blocking(move || sum_of_squares(n))
                .await
                .map_err(|e| WorkError::permanent(e.to_string()))?
                .ok_or_else(|| WorkError::permanent(format!("sum of squares below {n} overflows")))?;

            info!(worker = %label, n, sum, "Computed sum of squares");
            emitter.emit(json!({ "n": n, "sum_of_squares": Value::from(sum) }));
        }
        Ok(())
    }
}

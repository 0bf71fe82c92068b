use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use conveyor_core::{Consumer, Payload, RetryPolicy, StageName, WorkError, WorkerParams};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Staged bytes are written out once they reach this size, and on `DONE`.
const FLUSH_THRESHOLD: usize = 64 * 1024;

/// Complete JSON lines waiting to be written.
///
/// Bytes leave the buffer only once the output has accepted them, so a failed
/// write is resumed from the first unwritten byte instead of repeating lines.
#[derive(Debug, Default)]
pub(crate) struct PendingLines {
    bytes: Vec<u8>,
}

impl PendingLines {
    pub(crate) fn push(&mut self, item: &Payload) -> Result<(), serde_json::Error> {
        serde_json::to_writer(&mut self.bytes, item)?;
        self.bytes.push(b'\n');
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) async fn write_to<W: AsyncWrite + Unpin>(&mut self, out: &mut W) -> io::Result<()> {
        while !self.bytes.is_empty() {
            let n = out.write(&self.bytes).await?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            self.bytes.drain(..n);
        }
        out.flush().await
    }
}

/// Appends each item as one JSON line to `params.path`.
///
/// Lines are staged in memory and written in batches; the remainder is
/// written when the replica receives `DONE`. Replicas of the same stage share
/// the file in append mode.
pub struct JsonLinesSink {
    stage: StageName,
    label: String,
    path: PathBuf,
    retry: RetryPolicy,
    file: Option<File>,
    pending: PendingLines,
    staged: usize,
}

impl JsonLinesSink {
    pub fn new(params: &WorkerParams) -> Result<Self, String> {
        let path = params.require_str("path")?;
        if path.is_empty() {
            return Err("parameter 'path' must not be empty".to_string());
        }
        Ok(Self {
            stage: params.stage.clone(),
            label: params.label(),
            path: PathBuf::from(path),
            retry: params.retry,
            file: None,
            pending: PendingLines::default(),
            staged: 0,
        })
    }

    async fn try_flush(&mut self) -> Result<(), WorkError> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            debug!(worker = %self.label, path = %self.path.display(), "Opened output");
            self.file = Some(file);
        }
        let Some(file) = self.file.as_mut() else {
            return Err(WorkError::permanent("output file not open"));
        };
        self.pending.write_to(file).await?;
        Ok(())
    }

    /// Write everything staged, reopening the file between attempts.
    async fn flush(&mut self) -> Result<(), WorkError> {
        let mut attempt = 1;
        loop {
            match self.try_flush().await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    self.file = None;
                    match self.retry.retry_delay(self.stage.id(), attempt, &err) {
                        Some(delay) => {
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        None => return Err(err),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Consumer for JsonLinesSink {
    async fn consume(&mut self, item: &Payload) -> Result<Option<Payload>, WorkError> {
        self.pending.push(item)?;
        self.staged += 1;

        if self.pending.len() >= FLUSH_THRESHOLD {
            // The line is staged either way; a failed write is retried at the next flush.
            if let Err(err) = self.flush().await {
                warn!(worker = %self.label, error = %err, pending = self.pending.len(), "Write failed, keeping lines staged");
            }
        }
        Ok(None)
    }

    async fn finish(&mut self) -> Result<(), WorkError> {
        self.flush().await?;
        debug!(worker = %self.label, lines = self.staged, "Flushed output");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::tests::{params, queue};
    use conveyor_core::run_consumer_loop;
    use serde_json::{Value, json};
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Accepts part of the first write, fails the second, then behaves.
    #[derive(Default)]
    struct Flaky {
        written: Vec<u8>,
        calls: usize,
    }

    impl AsyncWrite for Flaky {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.calls += 1;
            let accepted = match self.calls {
                1 => buf.len() / 2,
                2 => return Poll::Ready(Err(io::ErrorKind::TimedOut.into())),
                _ => buf.len(),
            };
            self.written.extend_from_slice(&buf[..accepted]);
            Poll::Ready(Ok(accepted))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_interrupted_write_resumes_without_duplicates() {
        let mut pending = PendingLines::default();
        pending.push(&json!({"symbol": "AAPL"})).unwrap();
        pending.push(&json!({"symbol": "MSFT"})).unwrap();
        let mut out = Flaky::default();

        let err = pending.write_to(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(pending.len() > 0);

        pending.write_to(&mut out).await.unwrap();
        assert_eq!(pending.len(), 0);
        assert_eq!(
            String::from_utf8(out.written).unwrap(),
            "{\"symbol\":\"AAPL\"}\n{\"symbol\":\"MSFT\"}\n"
        );
    }

    #[tokio::test]
    async fn test_writes_one_line_per_item() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let input = queue("PriceQueue");
        input.push_item(json!({"symbol": "AAPL"}));
        input.push_item(json!(42));
        input.push_done();

        let params = params(
            "Store",
            Some(&input),
            None,
            None,
            json!({ "path": path.to_str().unwrap() }),
        );
        let mut sink = JsonLinesSink::new(&params).unwrap();
        let stats = run_consumer_loop(&mut sink, &params).await.unwrap();
        assert_eq!(stats.consumed, 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines, vec![json!({"symbol": "AAPL"}), json!(42)]);
    }

    #[tokio::test]
    async fn test_creates_file_with_no_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.jsonl");
        let input = queue("PriceQueue");
        input.push_done();

        let params = params(
            "Store",
            Some(&input),
            None,
            None,
            json!({ "path": path.to_str().unwrap() }),
        );
        let mut sink = JsonLinesSink::new(&params).unwrap();
        run_consumer_loop(&mut sink, &params).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[tokio::test]
    async fn test_unwritable_path_fails_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.jsonl");
        let input = queue("PriceQueue");
        input.push_item(json!(1));
        input.push_done();

        let params = params(
            "Store",
            Some(&input),
            None,
            None,
            json!({ "path": path.to_str().unwrap() }),
        );
        let mut sink = JsonLinesSink::new(&params).unwrap();
        let err = run_consumer_loop(&mut sink, &params).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_rejects_non_string_path() {
        let input = queue("In");
        let params = params("Store", Some(&input), None, None, json!({ "path": 7 }));
        assert!(JsonLinesSink::new(&params).is_err());
    }
}

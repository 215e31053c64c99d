// src/publisher.rs
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{log_failure, PipelineError, Sink};
use crate::models::TransactionRecord;
use crate::queue::QueueProducer;

/// Append-only JSONL file, one record per line.
pub struct JsonlLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlLog {
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        info!("Writing matched transactions to: {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `line` plus a newline in a single write.
    pub async fn append(&self, line: &[u8]) -> Result<(), PipelineError> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line);
        buf.push(b'\n');

        let mut file = self.file.lock().await;
        let written = async {
            file.write_all(&buf).await?;
            file.flush().await
        };
        written.await.map_err(|e| PipelineError::Publish {
            sink: Sink::Log,
            reason: e.to_string(),
        })
    }
}

/// Result of one sink for one record.
#[derive(Debug)]
pub enum SinkOutcome {
    Disabled,
    Written,
    Failed(PipelineError),
}

impl SinkOutcome {
    fn from_result(result: Result<(), PipelineError>) -> Self {
        match result {
            Ok(()) => SinkOutcome::Written,
            Err(e) => SinkOutcome::Failed(e),
        }
    }

    pub fn is_written(&self) -> bool {
        matches!(self, SinkOutcome::Written)
    }
}

#[derive(Debug)]
pub struct PublishReport {
    pub log: SinkOutcome,
    pub queue: SinkOutcome,
}

/// Fans a matched record out to the durable log and the queue.
///
/// The sinks run concurrently and independently; neither failure stops the other.
#[derive(Clone, Default)]
pub struct EventPublisher {
    log: Option<Arc<JsonlLog>>,
    queue: Option<Arc<dyn QueueProducer>>,
}

impl EventPublisher {
    pub fn new(log: Option<Arc<JsonlLog>>, queue: Option<Arc<dyn QueueProducer>>) -> Self {
        Self { log, queue }
    }

    pub async fn publish(&self, record: &TransactionRecord) -> PublishReport {
        let encoded = match serde_json::to_vec(record) {
            Ok(bytes) => bytes,
            Err(e) => {
                let failed = |enabled: bool, sink| {
                    if enabled {
                        SinkOutcome::Failed(PipelineError::Publish { sink, reason: e.to_string() })
                    } else {
                        SinkOutcome::Disabled
                    }
                };
                return PublishReport {
                    log: failed(self.log.is_some(), Sink::Log),
                    queue: failed(self.queue.is_some(), Sink::Queue),
                };
            }
        };

        let to_log = async {
            match &self.log {
                Some(log) => SinkOutcome::from_result(log.append(&encoded).await),
                None => SinkOutcome::Disabled,
            }
        };
        let to_queue = async {
            match &self.queue {
                Some(queue) => SinkOutcome::from_result(queue.produce(&record.hash, &encoded).await),
                None => SinkOutcome::Disabled,
            }
        };

        let (log, queue) = tokio::join!(to_log, to_queue);
        PublishReport { log, queue }
    }

    /// Publishes and logs any sink failure. Failures are never retried.
    pub async fn publish_and_log(&self, record: &TransactionRecord) -> PublishReport {
        let outcome = self.publish(record).await;
        for sink in [&outcome.log, &outcome.queue] {
            if let SinkOutcome::Failed(e) = sink {
                log_failure("publish", e);
            }
        }
        debug!(
            hash = %record.hash,
            log = outcome.log.is_written(),
            queue = outcome.queue.is_written(),
            "Published"
        );
        outcome
    }
}

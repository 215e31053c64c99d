// src/consumer.rs
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::db::{InsertOutcome, TransactionStore};
use crate::error::{log_failure, PipelineError};
use crate::models::TransactionRecord;
use crate::queue::{QueueMessage, QueueSource};

/// Pause after a failed queue read so a dead broker does not spin the loop.
const READ_ERROR_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Stored,
    Duplicate,
    DecodeFailed,
    StoreFailed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub stored: u64,
    pub duplicates: u64,
    pub decode_failures: u64,
    pub store_failures: u64,
}

impl ConsumerStats {
    fn record(&mut self, outcome: MessageOutcome) {
        self.received += 1;
        match outcome {
            MessageOutcome::Stored => self.stored += 1,
            MessageOutcome::Duplicate => self.duplicates += 1,
            MessageOutcome::DecodeFailed => self.decode_failures += 1,
            MessageOutcome::StoreFailed => self.store_failures += 1,
        }
    }
}

/// Drains the topic into the store with insert-or-ignore semantics, so
/// redelivered messages are harmless.
pub struct StorageConsumer {
    source: Arc<dyn QueueSource>,
    store: Arc<dyn TransactionStore>,
}

impl StorageConsumer {
    pub fn new(source: Arc<dyn QueueSource>, store: Arc<dyn TransactionStore>) -> Self {
        Self { source, store }
    }

    /// Every message counts as handled once this returns, whatever the outcome.
    pub async fn handle(&self, message: &QueueMessage) -> MessageOutcome {
        let record: TransactionRecord = match serde_json::from_slice(&message.payload) {
            Ok(r) => r,
            Err(e) => {
                let err = PipelineError::Decode(format!(
                    "partition {} offset {}: {}",
                    message.partition, message.offset, e
                ));
                log_failure("consume", &err);
                return MessageOutcome::DecodeFailed;
            }
        };

        match self.store.insert_ignore(&record).await {
            Ok(InsertOutcome::Inserted) => {
                info!(hash = %record.hash, "Stored transaction");
                MessageOutcome::Stored
            }
            Ok(InsertOutcome::Duplicate) => {
                debug!(hash = %record.hash, "Already stored, skipping");
                MessageOutcome::Duplicate
            }
            Err(e) => {
                log_failure("store", &e);
                MessageOutcome::StoreFailed
            }
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> ConsumerStats {
        let mut stats = ConsumerStats::default();
        info!("Storage consumer started. Waiting for data...");

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.source.next_message() => next,
            };

            match next {
                Ok(message) => stats.record(self.handle(&message).await),
                Err(e) => {
                    log_failure("consume", &e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(READ_ERROR_PAUSE) => {}
                    }
                }
            }
        }

        info!(?stats, "Storage consumer stopped");
        stats
    }
}

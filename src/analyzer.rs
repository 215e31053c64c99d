// src/analyzer.rs
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::detector::{AnomalyDetector, Verdict};
use crate::error::{log_failure, report, PipelineError};
use crate::models::TransactionRecord;
use crate::queue::{QueueMessage, QueueSource};
use crate::rpc::TransactionLookup;

const READ_ERROR_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyzeOutcome {
    Evaluated(Verdict),
    Skipped,
}

/// Executor role: re-checks queued transactions on chain and scores the mined ones.
///
/// Runs under its own consumer group, so it sees every message independently of
/// the storage consumer.
pub struct QueueAnalyzer {
    source: Arc<dyn QueueSource>,
    lookup: Arc<dyn TransactionLookup>,
    detector: AnomalyDetector,
}

impl QueueAnalyzer {
    pub fn new(
        source: Arc<dyn QueueSource>,
        lookup: Arc<dyn TransactionLookup>,
        detector: AnomalyDetector,
    ) -> Self {
        Self {
            source,
            lookup,
            detector,
        }
    }

    pub async fn handle(&self, message: &QueueMessage) -> AnalyzeOutcome {
        let decoded = serde_json::from_slice::<TransactionRecord>(&message.payload)
            .map_err(PipelineError::from);
        let Some(record) = report("analyze", decoded) else {
            return AnalyzeOutcome::Skipped;
        };

        let Some(mined) = report("analyze", self.lookup.mined_block(&record.hash).await) else {
            return AnalyzeOutcome::Skipped;
        };
        let Some(block_number) = mined else {
            debug!(hash = %record.hash, "Still pending, skipping");
            return AnalyzeOutcome::Skipped;
        };

        AnalyzeOutcome::Evaluated(self.detector.evaluate(&record, block_number).await)
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Analyzer started. Waiting for triggers...");

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.source.next_message() => next,
            };

            match next {
                Ok(message) => {
                    self.handle(&message).await;
                }
                Err(e) => {
                    log_failure("analyze", &e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(READ_ERROR_PAUSE) => {}
                    }
                }
            }
        }

        info!("Analyzer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertDispatcher, ChannelAlertSink};
    use crate::classifier::Classifier;
    use crate::models::{ClassificationResult, FeatureVector};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use tokio::time::Instant;

    struct AlwaysAnomalous;

    #[async_trait]
    impl Classifier for AlwaysAnomalous {
        async fn classify(&self, _f: &FeatureVector) -> Result<ClassificationResult, PipelineError> {
            Ok(ClassificationResult { is_anomaly: -1 })
        }
    }

    struct Chain(HashMap<String, Option<u64>>);

    #[async_trait]
    impl TransactionLookup for Chain {
        async fn mined_block(&self, hash: &str) -> Result<Option<u64>, PipelineError> {
            self.0.get(hash).copied().ok_or_else(|| PipelineError::Fetch {
                target: format!("transaction {hash}"),
                reason: "not found".into(),
            })
        }
    }

    struct Idle;

    #[async_trait]
    impl QueueSource for Idle {
        async fn next_message(&self) -> Result<QueueMessage, PipelineError> {
            std::future::pending().await
        }
    }

    /// Serves queued results, then cancels `done` and waits forever.
    struct Scripted {
        items: Mutex<VecDeque<Result<QueueMessage, PipelineError>>>,
        done: CancellationToken,
    }

    #[async_trait]
    impl QueueSource for Scripted {
        async fn next_message(&self) -> Result<QueueMessage, PipelineError> {
            let next = self.items.lock().unwrap().pop_front();
            match next {
                Some(item) => item,
                None => {
                    self.done.cancel();
                    std::future::pending().await
                }
            }
        }
    }

    fn payload(hash: &str) -> QueueMessage {
        let record = TransactionRecord {
            hash: hash.into(),
            to: "0x2222222222222222222222222222222222222222".into(),
            from: "0x1111111111111111111111111111111111111111".into(),
            nonce: 0,
            gas_price: "1".into(),
            gas_limit: 21_000,
            value: "1000".into(),
            block_timestamp: 0,
            input_data: "0x".into(),
            base_fee_per_gas: "0".into(),
        };
        QueueMessage {
            payload: serde_json::to_vec(&record).unwrap(),
            partition: 0,
            offset: 0,
        }
    }

    #[tokio::test]
    async fn only_mined_transactions_are_scored() {
        let (sink, mut alerts) = ChannelAlertSink::new();
        let analyzer = QueueAnalyzer::new(
            Arc::new(Idle),
            Arc::new(Chain(HashMap::from([
                ("0xmined".to_string(), Some(100)),
                ("0xpending".to_string(), None),
            ]))),
            AnomalyDetector::new(Arc::new(AlwaysAnomalous), AlertDispatcher::new(vec![Arc::new(sink)])),
        );

        let outcome = analyzer.handle(&payload("0xmined")).await;
        assert!(matches!(outcome, AnalyzeOutcome::Evaluated(Verdict::Anomalous(_))));
        assert_eq!(alerts.try_recv().unwrap().block_number, 100);

        assert_eq!(analyzer.handle(&payload("0xpending")).await, AnalyzeOutcome::Skipped);
        assert_eq!(analyzer.handle(&payload("0xunknown")).await, AnalyzeOutcome::Skipped);
        let garbage = QueueMessage { payload: b"nope".to_vec(), partition: 0, offset: 1 };
        assert_eq!(analyzer.handle(&garbage).await, AnalyzeOutcome::Skipped);
        assert!(alerts.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn run_pauses_after_read_errors_and_stops_on_cancel() {
        let shutdown = CancellationToken::new();
        let source = Scripted {
            items: Mutex::new(VecDeque::from(vec![
                Ok(payload("0xmined")),
                Err(PipelineError::Queue("broker unavailable".into())),
                Ok(QueueMessage { payload: b"nope".to_vec(), partition: 0, offset: 2 }),
                Ok(payload("0xpending")),
                Ok(payload("0xmined")),
            ])),
            done: shutdown.clone(),
        };
        let (sink, mut alerts) = ChannelAlertSink::new();
        let analyzer = QueueAnalyzer::new(
            Arc::new(source),
            Arc::new(Chain(HashMap::from([
                ("0xmined".to_string(), Some(100)),
                ("0xpending".to_string(), None),
            ]))),
            AnomalyDetector::new(Arc::new(AlwaysAnomalous), AlertDispatcher::new(vec![Arc::new(sink)])),
        );

        let started = Instant::now();
        analyzer.run(shutdown).await;

        assert!(started.elapsed() >= READ_ERROR_PAUSE);
        assert_eq!(alerts.try_recv().unwrap().block_number, 100);
        assert_eq!(alerts.try_recv().unwrap().block_number, 100);
        assert!(alerts.try_recv().is_err());
    }
}

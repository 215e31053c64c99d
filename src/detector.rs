// src/detector.rs
use std::sync::Arc;
use tracing::debug;

use crate::alert::AlertDispatcher;
use crate::classifier::{extract_features, Classifier};
use crate::error::report;
use crate::models::{AlertEvent, TransactionRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Anomalous(AlertEvent),
    Normal,
    /// The classifier could not be reached or answered nonsense.
    NoSignal,
}

/// Extractor → classifier → dispatcher, one call per record.
#[derive(Clone)]
pub struct AnomalyDetector {
    classifier: Arc<dyn Classifier>,
    dispatcher: AlertDispatcher,
}

impl AnomalyDetector {
    pub fn new(classifier: Arc<dyn Classifier>, dispatcher: AlertDispatcher) -> Self {
        Self {
            classifier,
            dispatcher,
        }
    }

    pub async fn evaluate(&self, record: &TransactionRecord, block_number: u64) -> Verdict {
        let features = extract_features(record);
        let Some(result) = report("classify", self.classifier.classify(&features).await) else {
            return Verdict::NoSignal;
        };

        if result.is_anomalous() {
            Verdict::Anomalous(self.dispatcher.raise(&record.hash, block_number))
        } else {
            debug!(hash = %record.hash, is_anomaly = result.is_anomaly, "Classified as normal");
            Verdict::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::ChannelAlertSink;
    use crate::error::PipelineError;
    use crate::models::{ClassificationResult, FeatureVector};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        answer: Result<i64, ()>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Classifier for Fixed {
        async fn classify(&self, _f: &FeatureVector) -> Result<ClassificationResult, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
                .map(|is_anomaly| ClassificationResult { is_anomaly })
                .map_err(|_| PipelineError::Classifier("timed out".into()))
        }
    }

    fn record() -> TransactionRecord {
        TransactionRecord {
            hash: "0xfeed".into(),
            to: "0x2222222222222222222222222222222222222222".into(),
            from: "0x1111111111111111111111111111111111111111".into(),
            nonce: 0,
            gas_price: "1".into(),
            gas_limit: 21_000,
            value: "1000".into(),
            block_timestamp: 0,
            input_data: "0x".into(),
            base_fee_per_gas: "0".into(),
        }
    }

    async fn run(answer: Result<i64, ()>) -> (Verdict, usize, usize) {
        let classifier = Arc::new(Fixed { answer, calls: AtomicUsize::new(0) });
        let (sink, mut alerts) = ChannelAlertSink::new();
        let detector = AnomalyDetector::new(classifier.clone(), AlertDispatcher::new(vec![Arc::new(sink)]));

        let verdict = detector.evaluate(&record(), 100).await;
        let mut raised = 0;
        while alerts.try_recv().is_ok() {
            raised += 1;
        }
        (verdict, raised, classifier.calls.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn sentinel_raises_exactly_one_alert() {
        let (verdict, raised, calls) = run(Ok(-1)).await;
        assert_eq!(raised, 1);
        assert_eq!(calls, 1);
        match verdict {
            Verdict::Anomalous(event) => {
                assert_eq!(event.triggering_hash, "0xfeed");
                assert_eq!(event.block_number, 100);
            }
            other => panic!("expected anomaly, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn other_values_raise_nothing() {
        for value in [1, 0, -2, i64::MAX] {
            let (verdict, raised, _) = run(Ok(value)).await;
            assert_eq!(verdict, Verdict::Normal);
            assert_eq!(raised, 0);
        }
    }

    #[tokio::test]
    async fn classifier_failure_is_no_signal_without_retry() {
        let (verdict, raised, calls) = run(Err(())).await;
        assert_eq!(verdict, Verdict::NoSignal);
        assert_eq!(raised, 0);
        assert_eq!(calls, 1);
    }
}

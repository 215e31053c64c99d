use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use chain_sentry::alert::{AlertDispatcher, ChannelAlertSink};
use chain_sentry::classifier::Classifier;
use chain_sentry::config::PoolConfig;
use chain_sentry::detector::AnomalyDetector;
use chain_sentry::error::PipelineError;
use chain_sentry::models::{
    AlertEvent, Block, ChainHeader, ChainTransaction, ClassificationResult, FeatureVector, TransactionRecord,
};
use chain_sentry::pipeline::{Ingestor, Stages};
use chain_sentry::pool::{OverflowPolicy, ShutdownMode, WorkerPool};
use chain_sentry::publisher::{EventPublisher, JsonlLog};
use chain_sentry::queue::QueueProducer;
use chain_sentry::rpc::BlockFetcher;
use chain_sentry::subscription::{HeaderFeed, HeaderStream, SubscriptionManager};
use chain_sentry::watchlist::Watchlist;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn router() -> Address {
    Address::repeat_byte(0x7a)
}

fn header() -> ChainHeader {
    ChainHeader {
        number: 100,
        hash: B256::repeat_byte(0x10),
        timestamp: 1_700_000_000,
    }
}

fn transfer(hash: u8, to: Address) -> ChainTransaction {
    ChainTransaction {
        hash: B256::repeat_byte(hash),
        from: Address::repeat_byte(0x01),
        to: Some(to),
        nonce: 0,
        gas_price: U256::from(1_000_000_000u64),
        gas_limit: 21_000,
        value: U256::from(1000u64),
        input: Bytes::new(),
    }
}

/// Serves block #100 holding one watched (T1) and one unwatched (T2) transaction.
struct FixedChain;

#[async_trait]
impl BlockFetcher for FixedChain {
    async fn fetch_block(&self, number: u64) -> Result<Block, PipelineError> {
        assert_eq!(number, 100);
        Ok(Block {
            header: header(),
            transactions: vec![transfer(0xa1, router()), transfer(0xa2, Address::repeat_byte(0x33))],
            base_fee_per_gas: Some(U256::from(7u64)),
        })
    }
}

#[derive(Default)]
struct RecordingQueue {
    sent: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait]
impl QueueProducer for RecordingQueue {
    async fn produce(&self, key: &str, payload: &[u8]) -> Result<(), PipelineError> {
        self.sent.lock().unwrap().push((key.to_string(), payload.to_vec()));
        Ok(())
    }
}

struct FlagsEverything;

#[async_trait]
impl Classifier for FlagsEverything {
    async fn classify(&self, features: &FeatureVector) -> Result<ClassificationResult, PipelineError> {
        assert_eq!(features.value, "1000");
        assert_eq!(features.gas_limit, 21_000);
        assert_eq!(features.input_data_size, 0);
        Ok(ClassificationResult { is_anomaly: -1 })
    }
}

/// First session yields block #100's header and then idles.
struct OneHeaderFeed;

#[async_trait]
impl HeaderFeed for OneHeaderFeed {
    async fn connect(&self) -> Result<HeaderStream, PipelineError> {
        Ok(stream::iter(vec![Ok(header())]).chain(stream::pending()).boxed())
    }
}

struct Harness {
    stages: Stages,
    log: Arc<JsonlLog>,
    queue: Arc<RecordingQueue>,
    alerts: mpsc::UnboundedReceiver<AlertEvent>,
    _dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(JsonlLog::open(dir.path().join("events.jsonl")).await.unwrap());
    let queue = Arc::new(RecordingQueue::default());
    let (sink, alerts) = ChannelAlertSink::new();

    let stages = Stages {
        fetcher: Arc::new(FixedChain),
        watchlist: Arc::new(Watchlist::new([(router(), Some("router".to_string()))])),
        publisher: EventPublisher::new(
            Some(Arc::clone(&log)),
            Some(Arc::clone(&queue) as Arc<dyn QueueProducer>),
        ),
        detector: AnomalyDetector::new(
            Arc::new(FlagsEverything),
            AlertDispatcher::new(vec![Arc::new(sink)]),
        ),
    };

    Harness {
        stages,
        log,
        queue,
        alerts,
        _dir: dir,
    }
}

fn t1_hash() -> String {
    format!("{:#x}", B256::repeat_byte(0xa1))
}

fn assert_single_t1_everywhere(h: &mut Harness) {
    let contents = std::fs::read_to_string(h.log.path()).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 1);
    let logged: TransactionRecord = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(logged.hash, t1_hash());
    assert_eq!(logged.to, router().to_checksum(None));
    assert_eq!(logged.block_timestamp, 1_700_000_000);
    assert_eq!(logged.base_fee_per_gas, "7");

    let sent = h.queue.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, t1_hash());
    let queued: TransactionRecord = serde_json::from_slice(&sent[0].1).unwrap();
    assert_eq!(queued, logged);

    let alert = h.alerts.try_recv().unwrap();
    assert_eq!(alert.triggering_hash, t1_hash());
    assert_eq!(alert.block_number, 100);
    assert!(h.alerts.try_recv().is_err());
}

#[tokio::test]
async fn watched_transaction_reaches_every_sink_once() {
    let mut h = harness().await;
    let pool = WorkerPool::new("transactions", 4, 16, OverflowPolicy::Block);

    let matched = h.stages.process_header(header(), &pool.handle()).await;
    assert_eq!(matched, 1);
    pool.shutdown(ShutdownMode::Drain { grace: Duration::from_secs(5) }).await;

    assert_single_t1_everywhere(&mut h);
}

#[tokio::test]
async fn ingestor_runs_from_header_to_alert_and_drains_on_shutdown() {
    let mut h = harness().await;
    let manager = SubscriptionManager::new(Arc::new(OneHeaderFeed), Duration::from_millis(10));
    let pools = PoolConfig {
        fetch_workers: 2,
        tx_workers: 4,
        queue_capacity: 16,
        overflow: OverflowPolicy::Block,
        shutdown_grace: Duration::from_secs(5),
    };

    let shutdown = CancellationToken::new();
    let ingestor = Ingestor::new(manager, h.stages.clone(), pools);
    let running = tokio::spawn(ingestor.run(shutdown.clone()));

    // Wait until the transaction job is under way, then let it drain.
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.queue.sent.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("record never reached the queue");

    shutdown.cancel();
    running.await.unwrap();

    assert_single_t1_everywhere(&mut h);
}

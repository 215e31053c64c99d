// src/pipeline.rs
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::PoolConfig;
use crate::detector::AnomalyDetector;
use crate::error::report;
use crate::filter::select_watched;
use crate::models::{ChainHeader, TransactionRecord};
use crate::pool::{PoolHandle, ShutdownMode, SubmitOutcome, WorkerPool};
use crate::publisher::EventPublisher;
use crate::rpc::BlockFetcher;
use crate::subscription::SubscriptionManager;
use crate::watchlist::Watchlist;

/// Everything a block job needs, shared read-only across workers.
#[derive(Clone)]
pub struct Stages {
    pub fetcher: Arc<dyn BlockFetcher>,
    pub watchlist: Arc<Watchlist>,
    pub publisher: EventPublisher,
    pub detector: AnomalyDetector,
}

impl Stages {
    /// Fetches the block for `header`, filters it and queues one job per match.
    /// Returns how many transactions matched.
    pub async fn process_header(&self, header: ChainHeader, tx_pool: &PoolHandle) -> usize {
        let Some(block) = report("fetch", self.fetcher.fetch_block(header.number).await) else {
            return 0;
        };

        let matched = select_watched(&block, &self.watchlist);
        if matched.is_empty() {
            debug!(block = header.number, txs = block.transactions.len(), "No watched transactions");
            return 0;
        }

        info!(block = header.number, matched = matched.len(), "Watched transactions in block");
        let count = matched.len();
        for record in matched {
            let stages = self.clone();
            let number = header.number;
            if tx_pool
                .submit(async move { stages.process_transaction(record, number).await })
                .await
                == SubmitOutcome::Closed
            {
                break;
            }
        }
        count
    }

    /// Publisher and detector run side by side; neither waits on the other's outcome.
    pub async fn process_transaction(&self, record: TransactionRecord, block_number: u64) {
        tokio::join!(
            self.publisher.publish_and_log(&record),
            self.detector.evaluate(&record, block_number),
        );
    }
}

/// The ingest role: subscription → fetch pool → filter → transaction pool.
pub struct Ingestor {
    manager: SubscriptionManager,
    stages: Stages,
    pools: PoolConfig,
}

impl Ingestor {
    pub fn new(manager: SubscriptionManager, stages: Stages, pools: PoolConfig) -> Self {
        Self {
            manager,
            stages,
            pools,
        }
    }

    /// Runs until `shutdown` fires, then drains both pools within the grace period.
    pub async fn run(self, shutdown: CancellationToken) {
        let Ingestor {
            manager,
            stages,
            pools,
        } = self;

        let fetch_pool = WorkerPool::new("fetch", pools.fetch_workers, pools.queue_capacity, pools.overflow);
        let tx_pool = WorkerPool::new("transactions", pools.tx_workers, pools.queue_capacity, pools.overflow);

        let (header_tx, mut header_rx) = mpsc::channel::<ChainHeader>(pools.queue_capacity);

        let subscription = {
            let shutdown = shutdown.clone();
            async move { manager.run(header_tx, shutdown).await }
        };

        let dispatch = {
            let fetch = fetch_pool.handle();
            let txs = tx_pool.handle();
            async move {
                while let Some(header) = header_rx.recv().await {
                    debug!(block = header.number, "New head");
                    let stages = stages.clone();
                    let txs = txs.clone();
                    let queued = fetch
                        .submit(async move {
                            stages.process_header(header, &txs).await;
                        })
                        .await;
                    if queued == SubmitOutcome::Closed {
                        break;
                    }
                }
            }
        };

        let (attempts, ()) = tokio::join!(subscription, dispatch);
        info!(attempts, "Subscription stopped, draining workers");

        let grace = ShutdownMode::Drain { grace: pools.shutdown_grace };
        fetch_pool.shutdown(grace).await;
        tx_pool.shutdown(grace).await;
        info!("Ingestor stopped");
    }
}

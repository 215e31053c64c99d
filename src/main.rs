use std::sync::{Arc, Mutex};
use std::time::Duration;

use chain_sentry::alert::{AlertDispatcher, AlertSink, TracingAlertSink};
use chain_sentry::analyzer::QueueAnalyzer;
use chain_sentry::api;
use chain_sentry::classifier::HttpClassifier;
use chain_sentry::config::{self, Config, Role};
use chain_sentry::consumer::StorageConsumer;
use chain_sentry::db::{self, SqliteStore};
use chain_sentry::detector::AnomalyDetector;
use chain_sentry::error::report;
use chain_sentry::pipeline::{Ingestor, Stages};
use chain_sentry::publisher::{EventPublisher, JsonlLog};
use chain_sentry::queue::{KafkaProducer, KafkaSource, QueueProducer};
use chain_sentry::rpc::RpcClient;
use chain_sentry::shutdown::ShutdownSignals;
use chain_sentry::subscription::{SubscriptionManager, WsHeaderFeed};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const RPC_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stdout)
        .with_target(false)
        .init();

    info!("chain-sentry starting...");

    let cfg = config::load()?;
    let mut signals = ShutdownSignals::install();
    let shutdown = CancellationToken::new();
    let mut tasks = JoinSet::new();

    if cfg.has_role(Role::Ingest) {
        let ingestor = build_ingestor(&cfg).await?;
        let token = shutdown.clone();
        tasks.spawn(async move {
            ingestor.run(token).await;
            "ingest"
        });
    }

    if cfg.has_role(Role::Storage) {
        start_storage(&cfg, &shutdown, &mut tasks)?;
    }

    if cfg.has_role(Role::Analyze) {
        if let Some(analyzer) = build_analyzer(&cfg)? {
            let token = shutdown.clone();
            tasks.spawn(async move {
                analyzer.run(token).await;
                "analyze"
            });
        }
    }

    if tasks.is_empty() {
        warn!("No role could be started, exiting");
        return Ok(());
    }

    tokio::select! {
        name = signals.recv() => info!(signal = name, "Shutdown signal received, stopping..."),
        Some(res) = tasks.join_next() => match res {
            Ok(role) => warn!(role, "Role exited early, stopping the rest"),
            Err(e) => error!("Role task panicked: {:?}", e),
        },
    }

    shutdown.cancel();
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(role) => info!(role, "Role stopped"),
            Err(e) => error!("Role task panicked: {:?}", e),
        }
    }

    info!("chain-sentry stopped.");
    Ok(())
}

fn detector(cfg: &Config) -> eyre::Result<AnomalyDetector> {
    let classifier = HttpClassifier::new(cfg.classifier_url.clone(), cfg.classifier_timeout)?;
    let sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(TracingAlertSink)];
    Ok(AnomalyDetector::new(Arc::new(classifier), AlertDispatcher::new(sinks)))
}

fn http_rpc(cfg: &Config) -> eyre::Result<RpcClient> {
    let url = cfg
        .rpc_http_url
        .clone()
        .ok_or_else(|| eyre::eyre!("RPC_HTTP_URL is not set"))?;
    Ok(RpcClient::new(url, RPC_TIMEOUT)?)
}

async fn build_ingestor(cfg: &Config) -> eyre::Result<Ingestor> {
    let log = match &cfg.event_log_path {
        Some(path) => match JsonlLog::open(path).await {
            Ok(log) => {
                info!(path = %path.display(), "Durable event log enabled");
                Some(Arc::new(log))
            }
            Err(e) => {
                error!(path = %path.display(), "Could not open event log: {}", e);
                None
            }
        },
        None => None,
    };

    let queue = match &cfg.kafka {
        Some(k) => report("queue", KafkaProducer::connect(k).await)
            .map(|p| Arc::new(p) as Arc<dyn QueueProducer>),
        None => None,
    };
    if log.is_none() && queue.is_none() {
        warn!("No sinks configured; matched transactions will only be classified");
    }

    for addr in cfg.watchlist.addresses() {
        match cfg.watchlist.label(addr) {
            Some(label) => info!("Watching {} ({})", addr, label),
            None => info!("Watching {}", addr),
        }
    }

    let ws_url = cfg
        .rpc_ws_url
        .clone()
        .ok_or_else(|| eyre::eyre!("RPC_WS_URL is not set"))?;
    let manager = SubscriptionManager::new(Arc::new(WsHeaderFeed::new(ws_url)), cfg.reconnect_delay);

    let stages = Stages {
        fetcher: Arc::new(http_rpc(cfg)?),
        watchlist: Arc::new(cfg.watchlist.clone()),
        publisher: EventPublisher::new(log, queue),
        detector: detector(cfg)?,
    };

    Ok(Ingestor::new(manager, stages, cfg.pool.clone()))
}

fn start_storage(
    cfg: &Config,
    shutdown: &CancellationToken,
    tasks: &mut JoinSet<&'static str>,
) -> eyre::Result<()> {
    let conn = db::connect(&cfg.db_path)?;
    db::run_migrations(&conn)?;
    let conn = Arc::new(Mutex::new(conn));
    info!(path = %cfg.db_path, "Store ready");

    if let Some(port) = cfg.port {
        let conn = Arc::clone(&conn);
        let token = shutdown.clone();
        tasks.spawn(async move {
            if let Err(e) = api::serve(port, conn, token).await {
                error!("API error: {:?}", e);
            }
            "api"
        });
    }

    let Some(kafka) = &cfg.kafka else {
        return Ok(());
    };
    let Some(source) = report("consume", KafkaSource::connect(kafka, &kafka.storage_group)) else {
        return Ok(());
    };

    let consumer = StorageConsumer::new(Arc::new(source), Arc::new(SqliteStore::new(conn)));
    let token = shutdown.clone();
    tasks.spawn(async move {
        consumer.run(token).await;
        "storage"
    });
    Ok(())
}

fn build_analyzer(cfg: &Config) -> eyre::Result<Option<QueueAnalyzer>> {
    let Some(kafka) = &cfg.kafka else {
        return Ok(None);
    };
    let Some(source) = report("analyze", KafkaSource::connect(kafka, &kafka.executor_group)) else {
        return Ok(None);
    };
    Ok(Some(QueueAnalyzer::new(
        Arc::new(source),
        Arc::new(http_rpc(cfg)?),
        detector(cfg)?,
    )))
}

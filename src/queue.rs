// src/queue.rs
//! Message-queue plumbing: producer and consumer seams plus their Kafka backends.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::Message;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task;
use tracing::{info, warn};

use crate::config::KafkaConfig;
use crate::error::{PipelineError, Sink};

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishes encoded records onto the topic.
#[async_trait]
pub trait QueueProducer: Send + Sync {
    async fn produce(&self, key: &str, payload: &[u8]) -> Result<(), PipelineError>;
}

/// One message pulled off the topic.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub payload: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
}

/// Pulls messages from the topic under a fixed consumer group.
#[async_trait]
pub trait QueueSource: Send + Sync {
    async fn next_message(&self) -> Result<QueueMessage, PipelineError>;
}

/// Picks the partition that has received the fewest bytes from this producer.
#[derive(Debug)]
pub struct LeastBytesBalancer {
    written: Vec<AtomicU64>,
}

impl LeastBytesBalancer {
    pub fn new(partitions: usize) -> Self {
        Self {
            written: (0..partitions.max(1)).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn partitions(&self) -> usize {
        self.written.len()
    }

    /// Chooses a partition for a message of `size` bytes and charges it.
    /// Ties go to the lowest partition number.
    pub fn pick(&self, size: usize) -> i32 {
        let mut best = 0;
        let mut best_load = u64::MAX;
        for (idx, counter) in self.written.iter().enumerate() {
            let load = counter.load(Ordering::Relaxed);
            if load < best_load {
                best = idx;
                best_load = load;
            }
        }
        self.written[best].fetch_add(size as u64, Ordering::Relaxed);
        best as i32
    }

    pub fn bytes_written(&self, partition: usize) -> u64 {
        self.written
            .get(partition)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

pub struct KafkaProducer {
    producer: FutureProducer,
    topic: String,
    balancer: Option<LeastBytesBalancer>,
    send_timeout: Duration,
}

impl KafkaProducer {
    pub async fn connect(cfg: &KafkaConfig) -> Result<Self, PipelineError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &cfg.brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| PipelineError::Queue(e.to_string()))?;

        // Metadata lookup is a blocking librdkafka call.
        let balancer = {
            let producer = producer.clone();
            let topic = cfg.topic.clone();
            task::spawn_blocking(move || partition_count(&producer, &topic))
                .await
                .unwrap_or_else(|e| {
                    warn!("Partition metadata task failed: {}", e);
                    None
                })
                .map(LeastBytesBalancer::new)
        };

        match &balancer {
            Some(b) => info!(topic = %cfg.topic, partitions = b.partitions(), "Kafka producer ready (least-bytes)"),
            None => warn!(topic = %cfg.topic, "Kafka producer ready, partitioning left to the client"),
        }

        Ok(Self {
            producer,
            topic: cfg.topic.clone(),
            balancer,
            send_timeout: Duration::from_secs(5),
        })
    }

    /// Partitions the balancer spreads over, or `None` when the client picks.
    pub fn balanced_partitions(&self) -> Option<usize> {
        self.balancer.as_ref().map(LeastBytesBalancer::partitions)
    }
}

fn partition_count(producer: &FutureProducer, topic: &str) -> Option<usize> {
    match producer.client().fetch_metadata(Some(topic), METADATA_TIMEOUT) {
        Ok(metadata) => metadata
            .topics()
            .iter()
            .find(|t| t.name() == topic)
            .map(|t| t.partitions().len())
            .filter(|n| *n > 0),
        Err(e) => {
            warn!(topic, "Could not load partition metadata: {}", e);
            None
        }
    }
}

#[async_trait]
impl QueueProducer for KafkaProducer {
    async fn produce(&self, key: &str, payload: &[u8]) -> Result<(), PipelineError> {
        let mut record = FutureRecord::to(&self.topic).key(key).payload(payload);
        if let Some(balancer) = &self.balancer {
            record = record.partition(balancer.pick(payload.len()));
        }

        match self.producer.send(record, self.send_timeout).await {
            Ok(_) => Ok(()),
            Err((e, _)) => Err(PipelineError::Publish {
                sink: Sink::Queue,
                reason: e.to_string(),
            }),
        }
    }
}

pub struct KafkaSource {
    consumer: StreamConsumer,
}

impl KafkaSource {
    pub fn connect(cfg: &KafkaConfig, group: &str) -> Result<Self, PipelineError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &cfg.brokers)
            .set("group.id", group)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| PipelineError::Queue(e.to_string()))?;

        consumer
            .subscribe(&[cfg.topic.as_str()])
            .map_err(|e| PipelineError::Queue(e.to_string()))?;

        info!(topic = %cfg.topic, group, "Kafka consumer subscribed");
        Ok(Self { consumer })
    }
}

#[async_trait]
impl QueueSource for KafkaSource {
    async fn next_message(&self) -> Result<QueueMessage, PipelineError> {
        let msg = self
            .consumer
            .recv()
            .await
            .map_err(|e| PipelineError::Queue(e.to_string()))?;

        Ok(QueueMessage {
            payload: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            partition: msg.partition(),
            offset: msg.offset(),
        })
    }
}

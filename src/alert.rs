// src/alert.rs
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::AlertEvent;

/// Receives raised alerts. Acting on them is someone else's job.
pub trait AlertSink: Send + Sync {
    fn deliver(&self, event: &AlertEvent);
}

/// Logs a loud warning per alert.
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn deliver(&self, event: &AlertEvent) {
        warn!("*************************************************");
        warn!("ANOMALY FLAGGED, POTENTIAL ARBITRAGE");
        warn!(
            block = event.block_number,
            detected_at = %event.timestamp.to_rfc3339(),
            "Triggering transaction: {}",
            event.triggering_hash
        );
        warn!("*************************************************");
    }
}

/// Hands alerts to an in-process actuator over an unbounded channel.
pub struct ChannelAlertSink {
    sender: mpsc::UnboundedSender<AlertEvent>,
}

impl ChannelAlertSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AlertEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl AlertSink for ChannelAlertSink {
    fn deliver(&self, event: &AlertEvent) {
        if self.sender.send(event.clone()).is_err() {
            debug!(hash = %event.triggering_hash, "Alert receiver gone");
        }
    }
}

#[derive(Clone, Default)]
pub struct AlertDispatcher {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl AlertDispatcher {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }

    /// Builds the event for `hash` in `block_number`, stamps it with the
    /// detection time and hands it to every sink.
    pub fn raise(&self, hash: &str, block_number: u64) -> AlertEvent {
        let event = AlertEvent {
            triggering_hash: hash.to_string(),
            block_number,
            timestamp: Utc::now(),
        };
        for sink in &self.sinks {
            sink.deliver(&event);
        }
        event
    }
}

// src/subscription.rs
//! Chain-head subscription with unconditional reconnect.
//!
//! `Disconnected → Connecting → Subscribed → Disconnected → ...` until the
//! shutdown token fires. Every failure waits the same fixed delay; there is no
//! retry limit and no backoff growth.

use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{report, PipelineError};
use crate::models::ChainHeader;

pub type HeaderStream = BoxStream<'static, Result<ChainHeader, PipelineError>>;

/// Opens one streaming session of new-head notifications.
#[async_trait]
pub trait HeaderFeed: Send + Sync {
    async fn connect(&self) -> Result<HeaderStream, PipelineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Disconnected,
    Connecting,
    Subscribed,
}

/// `eth_subscribe("newHeads")` over websocket.
pub struct WsHeaderFeed {
    url: String,
}

impl WsHeaderFeed {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl HeaderFeed for WsHeaderFeed {
    async fn connect(&self) -> Result<HeaderStream, PipelineError> {
        let provider = ProviderBuilder::new()
            .connect_ws(WsConnect::new(self.url.clone()))
            .await
            .map_err(|e| PipelineError::Connection(e.to_string()))?;

        let subscription = provider
            .subscribe_blocks()
            .await
            .map_err(|e| PipelineError::Connection(e.to_string()))?;

        // The provider owns the socket; keep it alive for as long as the stream.
        let stream = subscription.into_stream().map(move |header| {
            let _ = &provider;
            Ok(ChainHeader {
                number: header.inner.number,
                hash: header.hash,
                timestamp: header.inner.timestamp,
            })
        });

        Ok(stream.boxed())
    }
}

pub struct SubscriptionManager {
    feed: Arc<dyn HeaderFeed>,
    reconnect_delay: Duration,
    state: watch::Sender<SubscriptionState>,
}

impl SubscriptionManager {
    pub fn new(feed: Arc<dyn HeaderFeed>, reconnect_delay: Duration) -> Self {
        let (state, _) = watch::channel(SubscriptionState::Disconnected);
        Self {
            feed,
            reconnect_delay,
            state,
        }
    }

    pub fn state(&self) -> watch::Receiver<SubscriptionState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: SubscriptionState) {
        self.state.send_replace(next);
    }

    /// Forwards headers to `headers` until `shutdown` fires or the receiver
    /// goes away. Returns the number of connect attempts made.
    pub async fn run(
        &self,
        headers: mpsc::Sender<ChainHeader>,
        shutdown: CancellationToken,
    ) -> u64 {
        let mut attempts = 0u64;

        while !shutdown.is_cancelled() {
            attempts += 1;
            self.set_state(SubscriptionState::Connecting);
            info!(attempt = attempts, "Connecting to chain feed...");

            let connected = tokio::select! {
                _ = shutdown.cancelled() => break,
                res = self.feed.connect() => res,
            };

            if let Some(mut stream) = report("subscribe", connected) {
                self.set_state(SubscriptionState::Subscribed);
                info!("Subscribed to new heads");

                loop {
                    let next = tokio::select! {
                        _ = shutdown.cancelled() => {
                            self.set_state(SubscriptionState::Disconnected);
                            return attempts;
                        }
                        next = stream.next() => next,
                    };

                    match next {
                        Some(Ok(header)) => {
                            if headers.send(header).await.is_err() {
                                self.set_state(SubscriptionState::Disconnected);
                                return attempts;
                            }
                        }
                        Some(Err(e)) => {
                            report::<()>("subscription", Err(e));
                            break;
                        }
                        None => {
                            warn!("Header stream closed");
                            break;
                        }
                    }
                }
            }

            self.set_state(SubscriptionState::Disconnected);
            info!(delay = ?self.reconnect_delay, "Connection lost. Reconnecting...");

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        self.set_state(SubscriptionState::Disconnected);
        attempts
    }
}

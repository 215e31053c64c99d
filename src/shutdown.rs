// src/shutdown.rs
use tokio::signal;
use tracing::warn;

#[cfg(unix)]
use tokio::signal::unix::{signal as unix_signal, Signal, SignalKind};

/// Process termination signals: Ctrl-C everywhere, plus SIGTERM on unix so
/// `docker stop` and systemd get the same drain as an interactive stop.
pub struct ShutdownSignals {
    #[cfg(unix)]
    term: Option<Signal>,
}

#[cfg(unix)]
impl ShutdownSignals {
    /// Registers the handlers. Must be called inside the runtime.
    pub fn install() -> Self {
        let term = match unix_signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!("Could not install SIGTERM handler: {}", e);
                None
            }
        };
        Self { term }
    }

    /// Resolves with the name of the first signal received.
    pub async fn recv(&mut self) -> &'static str {
        match self.term.as_mut() {
            Some(term) => tokio::select! {
                _ = ctrl_c() => "SIGINT",
                _ = term.recv() => "SIGTERM",
            },
            None => {
                ctrl_c().await;
                "SIGINT"
            }
        }
    }
}

#[cfg(not(unix))]
impl ShutdownSignals {
    pub fn install() -> Self {
        Self {}
    }

    pub async fn recv(&mut self) -> &'static str {
        ctrl_c().await;
        "SIGINT"
    }
}

async fn ctrl_c() {
    if let Err(e) = signal::ctrl_c().await {
        warn!("Could not listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

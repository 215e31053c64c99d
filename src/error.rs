// src/error.rs
use thiserror::Error;
use tracing::{error, warn};

/// Which publisher sink a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    Log,
    Queue,
}

impl std::fmt::Display for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sink::Log => write!(f, "durable log"),
            Sink::Queue => write!(f, "queue"),
        }
    }
}

/// Every runtime failure the pipeline can observe. None of these are fatal.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("failed to fetch {target}: {reason}")]
    Fetch { target: String, reason: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("classifier error: {0}")]
    Classifier(String),

    #[error("publish to {sink} failed: {reason}")]
    Publish { sink: Sink, reason: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("queue error: {0}")]
    Queue(String),
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Decode(e.to_string())
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        PipelineError::Storage(e.to_string())
    }
}

/// Startup failures. These are the only errors allowed to stop the process.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {key} (needed by the {role} role)")]
    Missing { key: &'static str, role: &'static str },

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// What the caller should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Tear down the chain connection and reconnect after the fixed delay.
    Reconnect,
    /// Log it and move on to the next unit of work.
    Skip,
}

impl PipelineError {
    pub fn disposition(&self) -> Disposition {
        match self {
            PipelineError::Connection(_) => Disposition::Reconnect,
            _ => Disposition::Skip,
        }
    }

    fn is_loud(&self) -> bool {
        matches!(
            self,
            PipelineError::Publish { .. } | PipelineError::Storage(_)
        )
    }
}

/// Log-and-continue policy shared by every stage.
///
/// Returns the value on success. On failure the error is logged at the level its
/// kind calls for, and `None` is returned so the caller can drop the unit of work.
pub fn report<T>(stage: &str, result: Result<T, PipelineError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            log_failure(stage, &e);
            None
        }
    }
}

/// Logs `e` the way [`report`] would, for callers that keep the error around.
pub fn log_failure(stage: &str, e: &PipelineError) {
    if e.is_loud() {
        error!(stage, disposition = ?e.disposition(), "{}", e);
    } else {
        warn!(stage, disposition = ?e.disposition(), "{}", e);
    }
}

// src/pool.rs
//! Bounded worker pool.
//!
//! Jobs are boxed futures pushed onto a bounded channel and executed by a fixed
//! number of workers. When the channel is full the [`OverflowPolicy`] decides
//! whether the submitter waits or the job is discarded. Shutdown is awaitable and
//! either drains what is queued or cancels everything in flight.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Wait for room in the queue.
    Block,
    /// Discard the job and log it.
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    Dropped,
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub enum ShutdownMode {
    /// Finish queued jobs, then cancel whatever is still running after `grace`.
    Drain { grace: Duration },
    /// Abandon queued and in-flight jobs.
    Cancel,
}

/// Cloneable submission side of a [`WorkerPool`].
#[derive(Clone)]
pub struct PoolHandle {
    name: &'static str,
    sender: mpsc::Sender<Job>,
    policy: OverflowPolicy,
    closing: CancellationToken,
}

impl PoolHandle {
    pub async fn submit<F>(&self, job: F) -> SubmitOutcome
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.closing.is_cancelled() {
            return SubmitOutcome::Closed;
        }
        let job: Job = Box::pin(job);
        match self.policy {
            OverflowPolicy::Block => match self.sender.send(job).await {
                Ok(()) => SubmitOutcome::Queued,
                Err(_) => SubmitOutcome::Closed,
            },
            OverflowPolicy::Drop => match self.sender.try_send(job) {
                Ok(()) => SubmitOutcome::Queued,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(pool = self.name, "Queue full, dropping job");
                    SubmitOutcome::Dropped
                }
                Err(mpsc::error::TrySendError::Closed(_)) => SubmitOutcome::Closed,
            },
        }
    }
}

pub struct WorkerPool {
    name: &'static str,
    handle: PoolHandle,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    workers: Vec<JoinHandle<()>>,
    drain: CancellationToken,
    abort: CancellationToken,
}

impl WorkerPool {
    pub fn new(name: &'static str, workers: usize, capacity: usize, policy: OverflowPolicy) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let drain = CancellationToken::new();
        let abort = CancellationToken::new();

        let workers = (0..workers.max(1))
            .map(|_| {
                tokio::spawn(worker_loop(
                    Arc::clone(&receiver),
                    drain.clone(),
                    abort.clone(),
                ))
            })
            .collect::<Vec<_>>();

        info!(pool = name, workers = workers.len(), capacity, ?policy, "Worker pool started");

        Self {
            name,
            handle: PoolHandle {
                name,
                sender,
                policy,
                closing: drain.clone(),
            },
            receiver,
            workers,
            drain,
            abort,
        }
    }

    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    pub async fn shutdown(self, mode: ShutdownMode) {
        let WorkerPool {
            name,
            handle,
            receiver,
            mut workers,
            drain,
            abort,
        } = self;
        drop(handle);
        drain.cancel();

        match mode {
            ShutdownMode::Drain { grace } => {
                let join_all = async {
                    for w in workers.iter_mut() {
                        let _ = w.await;
                    }
                };
                if tokio::time::timeout(grace, join_all).await.is_err() {
                    warn!(pool = name, ?grace, "Drain grace period elapsed, cancelling remaining jobs");
                    abort.cancel();
                }
            }
            ShutdownMode::Cancel => abort.cancel(),
        }

        for w in workers {
            if !w.is_finished() {
                let _ = w.await;
            }
        }

        let mut discarded = 0usize;
        let mut rx = receiver.lock().await;
        while rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            warn!(pool = name, discarded, "Jobs left in queue at shutdown");
        }
        info!(pool = name, "Worker pool stopped");
    }
}

async fn worker_loop(
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    drain: CancellationToken,
    abort: CancellationToken,
) {
    loop {
        let next = {
            let mut rx = receiver.lock().await;
            if drain.is_cancelled() {
                rx.try_recv().ok()
            } else {
                tokio::select! {
                    biased;
                    _ = drain.cancelled() => rx.try_recv().ok(),
                    job = rx.recv() => job,
                }
            }
        };

        let Some(job) = next else { break };

        tokio::select! {
            biased;
            _ = abort.cancelled() => {
                debug!("Job abandoned by cancellation");
                break;
            }
            _ = job => {}
        }
    }
}

//! Background work queue.
//!
//! Deferred writes are packaged as [`Job`]s and handed to a [`BackgroundQueue`].
//! The submitter gets no result channel: a job's error is logged by the queue
//! and goes nowhere else. [`WorkerQueue`] is the bundled implementation, a
//! bounded channel drained by a fixed pool of tokio tasks.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Worker tasks draining the queue.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Jobs buffered before `submit` waits for room.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// How long `shutdown` waits for queued jobs before cancelling them.
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

fn default_workers() -> usize {
    4
}

fn default_capacity() -> usize {
    1024
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            capacity: default_capacity(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("background queue is closed")]
    Closed,
}

type WorkFn = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// One unit of deferred work. It owns everything it touches.
pub struct Job {
    label: String,
    work: WorkFn,
}

impl Job {
    pub fn new<F, Fut>(label: impl Into<String>, work: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            label: label.into(),
            work: Box::new(move |cancel| work(cancel).boxed()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run the job, converting a panic into an error.
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        match AssertUnwindSafe((self.work)(cancel)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("job '{}' panicked", self.label)),
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").field("label", &self.label).finish()
    }
}

/// Accepts work that runs later, possibly concurrently with other jobs.
#[async_trait]
pub trait BackgroundQueue: Send + Sync {
    async fn submit(&self, job: Job) -> Result<(), QueueError>;
}

/// Channel-plus-workers queue.
pub struct WorkerQueue {
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl WorkerQueue {
    /// Spawn the worker pool. Must be called inside a tokio runtime.
    pub fn start(config: &QueueConfig) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(config.capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let pending = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    rx.clone(),
                    pending.clone(),
                    idle.clone(),
                    cancel.child_token(),
                ))
            })
            .collect();

        tracing::debug!(
            workers = config.workers.max(1),
            capacity = config.capacity.max(1),
            "background queue started"
        );

        Self {
            tx: Mutex::new(Some(tx)),
            pending,
            idle,
            cancel,
            workers: Mutex::new(workers),
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// Jobs submitted but not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Wait until every job submitted so far has finished.
    pub async fn flush(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting work, drain what is queued and join the workers.
    /// Jobs still running after the shutdown timeout see their token cancelled.
    pub async fn shutdown(&self) {
        self.tx.lock().take();
        let handles = std::mem::take(&mut *self.workers.lock());
        if handles.is_empty() {
            return;
        }

        let drained = tokio::time::timeout(self.shutdown_timeout, self.flush()).await;
        if drained.is_err() {
            tracing::warn!(
                pending = self.pending(),
                timeout = ?self.shutdown_timeout,
                "background queue did not drain in time; cancelling"
            );
            self.cancel.cancel();
        }
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "background worker terminated abnormally");
            }
        }
        tracing::debug!("background queue stopped");
    }
}

#[async_trait]
impl BackgroundQueue for WorkerQueue {
    async fn submit(&self, job: Job) -> Result<(), QueueError> {
        let tx = self.tx.lock().clone().ok_or(QueueError::Closed)?;
        self.pending.fetch_add(1, Ordering::AcqRel);
        if tx.send(job).await.is_err() {
            finish_one(&self.pending, &self.idle);
            return Err(QueueError::Closed);
        }
        Ok(())
    }
}

fn finish_one(pending: &AtomicUsize, idle: &Notify) {
    if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
        idle.notify_waiters();
    }
}

#[tracing::instrument(skip_all, fields(worker = worker), level = "debug")]
async fn worker_loop(
    worker: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    cancel: CancellationToken,
) {
    loop {
        let next = { rx.lock().await.recv().await };
        let Some(job) = next else {
            break;
        };
        let label = job.label().to_string();
        if let Err(e) = job.run(cancel.clone()).await {
            tracing::error!(job = %label, error = %e, "background job failed");
        }
        finish_one(&pending, &idle);
    }
}

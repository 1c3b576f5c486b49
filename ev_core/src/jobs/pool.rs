//! Fixed worker pool for background jobs.
//!
//! Workers pull from a bounded mpsc queue, one job in flight per worker.
//! Shutdown is cooperative: a watch channel flips to true, jobs observe it
//! at their suspension points, and the queue sender is dropped so idle
//! workers drain out. Each attempt also runs under the hard time limit;
//! a timed-out attempt counts as a failure and is retried from the top.

use crate::cache::BatchJobStatus;
use crate::context::AppContext;
use crate::error::PipelineError;
use crate::jobs::{refresh, JobEnvelope, JobKind, JobRegistry, JobState};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const QUEUE_DEPTH: usize = 64;

pub struct WorkerPool {
    tx: parking_lot::Mutex<Option<mpsc::Sender<JobEnvelope>>>,
    cancel_tx: watch::Sender<bool>,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    registry: Arc<JobRegistry>,
}

impl WorkerPool {
    /// Spawn `workers` workers bound to the shared context.
    pub fn start(ctx: Arc<AppContext>, workers: usize) -> Self {
        let (tx, rx) = mpsc::channel::<JobEnvelope>(QUEUE_DEPTH);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let rx = Arc::new(Mutex::new(rx));
        let registry = Arc::new(JobRegistry::default());

        let mut handles = Vec::with_capacity(workers.max(1));
        for worker_id in 0..workers.max(1) {
            let ctx = ctx.clone();
            let rx = rx.clone();
            let cancel_rx = cancel_rx.clone();
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, ctx, rx, cancel_rx, registry).await;
            }));
        }

        info!(workers = handles.len(), "worker pool started");
        Self {
            tx: parking_lot::Mutex::new(Some(tx)),
            cancel_tx,
            handles: parking_lot::Mutex::new(handles),
            registry,
        }
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        self.registry.clone()
    }

    /// Enqueue a job. Fails when the queue is full or the pool is
    /// shutting down.
    pub fn submit(&self, job: JobEnvelope) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .clone()
            .ok_or_else(|| anyhow!("worker pool is shut down"))?;
        self.registry.set(job.job_id, JobState::Pending);
        tx.try_send(job)
            .map_err(|e| anyhow!("job queue rejected submission: {e}"))
    }

    /// Signal cancellation, close the queue and wait for workers to drain.
    pub async fn shutdown(&self) {
        info!("worker pool shutting down");
        let _ = self.cancel_tx.send(true);
        self.tx.lock().take();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task panicked during shutdown");
            }
        }
        info!("worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<AppContext>,
    rx: Arc<Mutex<mpsc::Receiver<JobEnvelope>>>,
    cancel_rx: watch::Receiver<bool>,
    registry: Arc<JobRegistry>,
) {
    loop {
        if *cancel_rx.borrow() {
            break;
        }
        // Hold the receiver lock only while waiting; one job in flight
        // per worker.
        let job = {
            let mut rx = rx.lock().await;
            let mut cancel = cancel_rx.clone();
            tokio::select! {
                job = rx.recv() => job,
                _ = cancel.changed() => None,
            }
        };
        let Some(job) = job else { break };
        run_job(worker_id, &ctx, job, &cancel_rx, &registry).await;
    }
    info!(worker_id, "worker exiting");
}

async fn run_job(
    worker_id: usize,
    ctx: &Arc<AppContext>,
    job: JobEnvelope,
    cancel_rx: &watch::Receiver<bool>,
    registry: &Arc<JobRegistry>,
) {
    let hard_limit = Duration::from_secs(ctx.config.job_hard_limit_secs);
    let soft_limit = Duration::from_secs(ctx.config.job_soft_limit_secs);
    let mut last_error = String::new();

    for attempt in 1..=job.policy.max_attempts {
        if *cancel_rx.borrow() {
            registry.set(job.job_id, JobState::Failure);
            return;
        }

        let outcome = tokio::time::timeout(
            hard_limit,
            run_attempt(ctx, &job, cancel_rx, soft_limit, registry),
        )
        .await;

        match outcome {
            Ok(Ok(())) => {
                registry.set(job.job_id, JobState::Success);
                return;
            }
            Ok(Err(PipelineError::Cancelled)) => {
                info!(worker_id, job_id = %job.job_id, "job cancelled");
                registry.set(job.job_id, JobState::Failure);
                return;
            }
            Ok(Err(e)) if !e.is_retryable() => {
                error!(worker_id, job_id = %job.job_id, error = %e, "job failed permanently");
                last_error = e.to_string();
                break;
            }
            Ok(Err(e)) => {
                warn!(
                    worker_id,
                    job_id = %job.job_id,
                    attempt,
                    max = job.policy.max_attempts,
                    error = %e,
                    "job attempt failed"
                );
                last_error = e.to_string();
            }
            Err(_) => {
                warn!(
                    worker_id,
                    job_id = %job.job_id,
                    attempt,
                    max = job.policy.max_attempts,
                    limit_secs = hard_limit.as_secs(),
                    "job attempt hit the hard time limit"
                );
                last_error = format!("hard time limit of {}s exceeded", hard_limit.as_secs());
            }
        }

        if attempt < job.policy.max_attempts {
            tokio::time::sleep(job.policy.backoff(attempt)).await;
        }
    }

    registry.set(job.job_id, JobState::Failure);
    error!(worker_id, job_id = %job.job_id, error = %last_error, "job exhausted retries");

    // Batch jobs mirror the terminal failure so pollers see it instead of
    // a processing status that never resolves.
    if let JobKind::Refresh {
        batch_id: Some(batch_id),
    } = &job.kind
    {
        let status = BatchJobStatus::errored(batch_id, &last_error);
        if let Err(e) = ctx.cache.store_batch_status(&status).await {
            warn!(batch_id, error = %format!("{e:#}"), "failed to store batch failure status");
        }
    }
}

async fn run_attempt(
    ctx: &Arc<AppContext>,
    job: &JobEnvelope,
    cancel_rx: &watch::Receiver<bool>,
    soft_limit: Duration,
    registry: &Arc<JobRegistry>,
) -> Result<(), PipelineError> {
    match &job.kind {
        JobKind::Refresh { batch_id } => {
            let deadline = refresh::soft_deadline(soft_limit);
            refresh::run_refresh(
                ctx,
                job.job_id,
                batch_id.as_deref(),
                cancel_rx,
                deadline,
                registry,
            )
            .await
            .map(|_| ())
        }
        JobKind::HealthCheck => refresh::run_health_check(ctx).await,
    }
}

//! Bounded worker pool.
//!
//! Pulls entries from the dispatch queue and runs them through the configured
//! [`JobProcessor`], never more than `capacity` at once. A permit is taken
//! before an entry is pulled, so the highest-priority entry is chosen at the
//! moment a slot actually frees up.

use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::job_store::JobStore;
use super::processor::JobProcessor;
use super::queue::{PriorityDispatchQueue, QueueEntry};
use super::types::JobStatus;
use crate::types::JobId;

/// What the pool left behind when it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Jobs whose outcome was recorded. A job that expired while running is not counted.
    pub completed: usize,
    /// Entries still queued at shutdown, in dispatch order. Their jobs stay QUEUED.
    pub drained: Vec<JobId>,
}

#[derive(Debug)]
pub struct WorkerPool {
    queue: Arc<PriorityDispatchQueue>,
    store: Arc<JobStore>,
    processor: Arc<dyn JobProcessor>,
    permits: Arc<Semaphore>,
    capacity: usize,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<PriorityDispatchQueue>,
        store: Arc<JobStore>,
        processor: Arc<dyn JobProcessor>,
        capacity: usize,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue,
            store,
            processor,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            cancel: CancellationToken::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs currently being processed.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    /// Stop pulling new work and close the queue.
    ///
    /// In-flight jobs are allowed to finish; [`run`](Self::run) returns once they have.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.queue.close();
    }

    /// Run until [`shutdown`](Self::shutdown) is called or the queue is closed.
    pub async fn run(&self) -> ShutdownReport {
        tracing::info!(capacity = self.capacity, "worker_pool_started");
        let mut tasks = JoinSet::new();
        let mut completed = 0;

        loop {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let entry = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                entry = self.queue.next() => match entry {
                    Some(entry) => entry,
                    None => break,
                },
            };

            let span = tracing::info_span!("job", job_id = %entry.job_id);
            tasks.spawn(
                execute(entry, self.store.clone(), self.processor.clone(), permit).instrument(span),
            );
            while let Some(joined) = tasks.try_join_next() {
                completed += reap(joined);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            completed += reap(joined);
        }

        let drained: Vec<JobId> = self.queue.drain().into_iter().map(|e| e.job_id).collect();
        if !drained.is_empty() {
            tracing::warn!(count = drained.len(), "queued_jobs_left_at_shutdown");
        }
        tracing::info!(completed, "worker_pool_stopped");
        ShutdownReport { completed, drained }
    }
}

fn reap(joined: Result<bool, JoinError>) -> usize {
    match joined {
        Ok(ran) => usize::from(ran),
        Err(e) => {
            tracing::error!(error = %e, "worker_task_aborted");
            0
        }
    }
}

/// Run one job to a terminal state. Returns true only when its outcome was recorded.
async fn execute(
    entry: QueueEntry,
    store: Arc<JobStore>,
    processor: Arc<dyn JobProcessor>,
    _permit: OwnedSemaphorePermit, // released after the outcome is recorded
) -> bool {
    let job = match store.transition(&entry.job_id, JobStatus::Running, None) {
        Ok(job) => job,
        Err(e) => {
            tracing::warn!(error = %e, "job_skipped");
            return false;
        }
    };

    let recorded = match AssertUnwindSafe(processor.process(&job)).catch_unwind().await {
        Ok(Ok(result)) => store.transition(&job.job_id, JobStatus::Succeeded, Some(result)),
        Ok(Err(e)) => {
            tracing::warn!(url = %job.url, error = %e, "job_failed");
            store.record_failure(&job.job_id, e.to_string())
        }
        Err(panic) => {
            let message = panic_message(&*panic);
            tracing::error!(url = %job.url, panic = %message, "job_panicked");
            store.record_failure(&job.job_id, format!("processor panicked: {message}"))
        }
    };

    // The job may have expired while running.
    match recorded {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "job_outcome_dropped");
            false
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

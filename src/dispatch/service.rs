//! Recrawl submission and status.
//!
//! Ties admission together: validate the batch, honour the idempotency key,
//! record the jobs, then make them visible to the worker pool. A submission
//! either lands completely or leaves no trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::job_store::JobStore;
use super::queue::{EnqueueRequest, PriorityDispatchQueue, QueueEntry};
use super::types::{Job, JobStatus, JobView, Priority};
use crate::types::{Config, Error, JobGroupId, JobId, Result, TenantId};
use crate::validation::{validate_batch_size, validate_http_url, validate_non_empty};

/// A batch of urls to recrawl.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub callback_url: Option<String>,
}

/// Accepted submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_group_id: JobGroupId,
    pub jobs: Vec<JobView>,
}

/// Submit/status facade over the job store and the dispatch queue.
#[derive(Debug, Clone)]
pub struct RecrawlService {
    config: Arc<Config>,
    store: Arc<JobStore>,
    queue: Arc<PriorityDispatchQueue>,
}

impl RecrawlService {
    pub fn new(config: Arc<Config>, store: Arc<JobStore>, queue: Arc<PriorityDispatchQueue>) -> Self {
        Self {
            config,
            store,
            queue,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<PriorityDispatchQueue> {
        &self.queue
    }

    /// Admit a batch of urls as one job group.
    pub fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse> {
        let recrawl = &self.config.recrawl;
        validate_batch_size(request.urls.len(), recrawl.max_urls_per_request)?;
        let urls = request
            .urls
            .iter()
            .enumerate()
            .map(|(i, url)| validate_http_url(url, &format!("urls[{i}]")))
            .collect::<Result<Vec<_>>>()?;
        let callback_url = request
            .callback_url
            .as_deref()
            .map(|url| validate_http_url(url, "callback_url"))
            .transpose()?;
        if let Some(key) = &request.idempotency_key {
            validate_non_empty(key, "idempotency_key")?;
        }

        let now = Utc::now();
        let sla_deadline = offset(now, recrawl.sla)?;
        if request.not_before.is_some_and(|nb| nb >= sla_deadline) {
            return Err(Error::validation("not_before falls after the SLA deadline"));
        }
        let eligible_at = request.not_before.map_or(now, |nb| nb.max(now));
        let estimated_start_time = offset(eligible_at, recrawl.estimated_start_delay)?;

        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = self.store.lookup_idempotency(request.tenant_id.as_ref(), key) {
                tracing::info!(job_group_id = %existing, "idempotent_replay_rejected");
                return Err(Error::Conflict {
                    job_group_id: existing,
                });
            }
        }

        let job_group_id = JobGroupId::new();
        let entries = self.queue.stage(&EnqueueRequest {
            urls,
            priority: request.priority,
            group_id: job_group_id.clone(),
            tenant_id: request.tenant_id.clone(),
            not_before: request.not_before,
        });
        let jobs: Vec<Job> = entries
            .iter()
            .map(|entry| Job {
                job_id: entry.job_id.clone(),
                url: entry.url.clone(),
                priority: entry.priority,
                group_id: entry.group_id.clone(),
                tenant_id: entry.tenant_id.clone(),
                status: JobStatus::Queued,
                created_at: now,
                updated_at: now,
                not_before: entry.not_before,
                estimated_start_time,
                sla_deadline,
                result: None,
                error: None,
                reason: request.reason.clone(),
                callback_url: callback_url.clone(),
            })
            .collect();
        let views = jobs.iter().map(Job::view).collect();

        // Re-checks the key atomically with the insert; a racing duplicate loses here.
        self.store
            .create(jobs, request.idempotency_key.as_deref())?;
        self.admit(&job_group_id, entries)?;

        tracing::info!(
            job_group_id = %job_group_id,
            count = request.urls.len(),
            priority = ?request.priority,
            "recrawl_submitted"
        );
        Ok(SubmitResponse {
            job_group_id,
            jobs: views,
        })
    }

    fn admit(&self, job_group_id: &JobGroupId, entries: Vec<QueueEntry>) -> Result<()> {
        if let Err(e) = self.queue.admit(entries) {
            let removed = self.store.discard_group(job_group_id);
            tracing::warn!(job_group_id = %job_group_id, removed, error = %e, "recrawl_rolled_back");
            return Err(e);
        }
        Ok(())
    }

    /// Current state of one job.
    pub fn status(&self, job_id: &JobId) -> Result<Job> {
        self.store.get(job_id)
    }

    /// Current state of every job in a group.
    pub fn group_status(&self, job_group_id: &JobGroupId) -> Result<Vec<Job>> {
        let jobs = self.store.group(job_group_id);
        if jobs.is_empty() {
            return Err(Error::not_found(format!("unknown job group: {}", job_group_id)));
        }
        Ok(jobs)
    }
}

fn offset(at: DateTime<Utc>, d: std::time::Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .ok_or_else(|| Error::internal(format!("duration out of range: {d:?}")))
}

//! Job lifecycle store.
//!
//! Authoritative per-job state and the idempotency registry. Enforces the
//! state machine:
//! QUEUED → RUNNING → {SUCCEEDED|FAILED}, and QUEUED|RUNNING → EXPIRED once
//! the SLA deadline has passed.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::types::{Job, JobStatus};
use crate::types::{Error, JobGroupId, JobId, Result, TenantId};

/// (tenant or "", idempotency key)
type IdempotencyKey = (String, String);

fn registry_key(tenant: Option<&TenantId>, key: &str) -> IdempotencyKey {
    (
        tenant.map(|t| t.as_str().to_string()).unwrap_or_default(),
        key.to_string(),
    )
}

#[derive(Debug, Default)]
struct StoreState {
    jobs: HashMap<JobId, Job>,
    groups: HashMap<JobGroupId, Vec<JobId>>,
    idempotency: HashMap<IdempotencyKey, JobGroupId>,
}

impl StoreState {
    /// Move an overdue job to EXPIRED. Returns true if it changed.
    fn expire_if_overdue(job: &mut Job, now: DateTime<Utc>) -> bool {
        if job.is_overdue(now) {
            tracing::info!(job_id = %job.job_id, from = ?job.status, "job_expired");
            job.status = JobStatus::Expired;
            job.updated_at = now;
            true
        } else {
            false
        }
    }

    fn job_mut(&mut self, job_id: &JobId) -> Result<&mut Job> {
        self.jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::not_found(format!("unknown job: {}", job_id)))
    }
}

/// In-memory job store shared by the recrawl service and the worker pool.
#[derive(Debug, Default)]
pub struct JobStore {
    state: Mutex<StoreState>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert the jobs of one submission group with status QUEUED.
    ///
    /// All jobs must share one group and tenant. If `idempotency_key` is
    /// already registered for that tenant under a different group, nothing is
    /// inserted and `Error::Conflict` carries the original group id.
    pub fn create(&self, jobs: Vec<Job>, idempotency_key: Option<&str>) -> Result<()> {
        let Some(first) = jobs.first() else {
            return Err(Error::validation("cannot create an empty job group"));
        };
        let group_id = first.group_id.clone();
        let tenant_id = first.tenant_id.clone();
        if jobs
            .iter()
            .any(|j| j.group_id != group_id || j.tenant_id != tenant_id)
        {
            return Err(Error::validation(
                "jobs in one create call must share group and tenant",
            ));
        }

        let mut state = self.lock();

        let key = idempotency_key.map(|k| registry_key(tenant_id.as_ref(), k));
        if let Some(key) = &key {
            if let Some(existing) = state.idempotency.get(key) {
                if *existing != group_id {
                    return Err(Error::Conflict {
                        job_group_id: existing.clone(),
                    });
                }
            }
        }
        if let Some(dup) = jobs.iter().find(|j| state.jobs.contains_key(&j.job_id)) {
            return Err(Error::internal(format!("duplicate job id: {}", dup.job_id)));
        }

        let now = Utc::now();
        let members = state.groups.entry(group_id.clone()).or_default();
        members.extend(jobs.iter().map(|j| j.job_id.clone()));
        for mut job in jobs {
            job.status = JobStatus::Queued;
            job.updated_at = now;
            job.result = None;
            job.error = None;
            state.jobs.insert(job.job_id.clone(), job);
        }
        if let Some(key) = key {
            state.idempotency.entry(key).or_insert(group_id);
        }
        Ok(())
    }

    /// Group registered for `(tenant, key)`, if any.
    pub fn lookup_idempotency(&self, tenant: Option<&TenantId>, key: &str) -> Option<JobGroupId> {
        self.lock()
            .idempotency
            .get(&registry_key(tenant, key))
            .cloned()
    }

    /// Snapshot of a job. Overdue jobs are moved to EXPIRED first.
    pub fn get(&self, job_id: &JobId) -> Result<Job> {
        let mut state = self.lock();
        let job = state.job_mut(job_id)?;
        StoreState::expire_if_overdue(job, Utc::now());
        Ok(job.clone())
    }

    /// Apply a state transition, storing `result` when given.
    pub fn transition(
        &self,
        job_id: &JobId,
        to: JobStatus,
        result: Option<serde_json::Value>,
    ) -> Result<Job> {
        self.apply(job_id, to, |job| {
            if result.is_some() {
                job.result = result;
            }
        })
    }

    /// RUNNING → FAILED with a diagnostic.
    pub fn record_failure(&self, job_id: &JobId, diagnostic: impl Into<String>) -> Result<Job> {
        let diagnostic = diagnostic.into();
        self.apply(job_id, JobStatus::Failed, |job| job.error = Some(diagnostic))
    }

    fn apply<F>(&self, job_id: &JobId, to: JobStatus, update: F) -> Result<Job>
    where
        F: FnOnce(&mut Job),
    {
        let mut state = self.lock();
        let job = state.job_mut(job_id)?;
        let now = Utc::now();
        StoreState::expire_if_overdue(job, now);

        if !job.status.can_transition_to(to) {
            return Err(Error::state_transition(format!(
                "cannot move job {} from {:?} to {:?}",
                job_id, job.status, to
            )));
        }

        job.status = to;
        job.updated_at = now;
        update(job);
        tracing::debug!(job_id = %job_id, status = ?to, "job_transition");
        Ok(job.clone())
    }

    /// Remove a group and its idempotency record. Returns the number of jobs removed.
    pub fn discard_group(&self, group_id: &JobGroupId) -> usize {
        let mut state = self.lock();
        let removed = state.groups.remove(group_id).unwrap_or_default();
        for job_id in &removed {
            state.jobs.remove(job_id);
        }
        state.idempotency.retain(|_, g| g != group_id);
        removed.len()
    }

    /// Snapshots of every job in a group, in creation order.
    pub fn group(&self, group_id: &JobGroupId) -> Vec<Job> {
        let state = self.lock();
        state
            .groups
            .get(group_id)
            .map(|ids| ids.iter().filter_map(|id| state.jobs.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Expire every overdue job. Returns how many changed.
    pub fn expire_overdue(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        let mut expired = 0;
        for job in state.jobs.values_mut() {
            if StoreState::expire_if_overdue(job, now) {
                expired += 1;
            }
        }
        expired
    }

    /// Remove terminal jobs last updated before `cutoff`.
    ///
    /// A group is dropped with its last job, and its idempotency record goes
    /// with it, so a key only deduplicates while its group is retained.
    /// Returns the number of jobs removed.
    pub fn purge_terminal(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        let before = state.jobs.len();
        state
            .jobs
            .retain(|_, job| !(job.status.is_terminal() && job.updated_at < cutoff));
        let removed = before - state.jobs.len();
        if removed == 0 {
            return 0;
        }

        let StoreState {
            jobs,
            groups,
            idempotency,
        } = &mut *state;
        groups.retain(|_, members| {
            members.retain(|id| jobs.contains_key(id));
            !members.is_empty()
        });
        idempotency.retain(|_, group_id| groups.contains_key(group_id));
        tracing::debug!(removed, "terminal_jobs_purged");
        removed
    }

    pub fn count_by_status(&self, status: JobStatus) -> usize {
        self.lock()
            .jobs
            .values()
            .filter(|job| job.status == status)
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::types::Priority;
    use chrono::Duration;

    fn job(url: &str, group: &JobGroupId, tenant: Option<&str>) -> Job {
        let now = Utc::now();
        Job {
            job_id: JobId::new(),
            url: url.to_string(),
            priority: Priority::Normal,
            group_id: group.clone(),
            tenant_id: tenant.map(TenantId::must),
            status: JobStatus::Queued,
            created_at: now,
            updated_at: now,
            not_before: None,
            estimated_start_time: now,
            sla_deadline: now + Duration::hours(1),
            result: None,
            error: None,
            reason: None,
            callback_url: None,
        }
    }

    #[test]
    fn test_state_transitions() {
        let store = JobStore::new();
        let group = JobGroupId::new();
        let j = job("https://a.example/", &group, None);
        let id = j.job_id.clone();
        store.create(vec![j], None).unwrap();
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Queued);

        store.transition(&id, JobStatus::Running, None).unwrap();
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Running);

        let done = store
            .transition(&id, JobStatus::Succeeded, Some(serde_json::json!({"ok": true})))
            .unwrap();
        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(done.result, Some(serde_json::json!({"ok": true})));
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let store = JobStore::new();
        let group = JobGroupId::new();
        let j = job("https://a.example/", &group, None);
        let id = j.job_id.clone();
        store.create(vec![j], None).unwrap();

        assert!(matches!(
            store.transition(&id, JobStatus::Succeeded, None),
            Err(Error::StateTransition(_))
        ));

        store.transition(&id, JobStatus::Running, None).unwrap();
        store.transition(&id, JobStatus::Succeeded, None).unwrap();
        assert!(matches!(
            store.transition(&id, JobStatus::Running, None),
            Err(Error::StateTransition(_))
        ));
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Succeeded);
    }

    #[test]
    fn test_record_failure_keeps_diagnostic() {
        let store = JobStore::new();
        let group = JobGroupId::new();
        let j = job("https://a.example/", &group, None);
        let id = j.job_id.clone();
        store.create(vec![j], None).unwrap();
        store.transition(&id, JobStatus::Running, None).unwrap();

        let failed = store.record_failure(&id, "connection reset").unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("connection reset"));
    }

    #[test]
    fn test_unknown_job_not_found() {
        let store = JobStore::new();
        let missing = JobId::must("missing");
        assert!(matches!(store.get(&missing), Err(Error::NotFound(_))));
        assert!(matches!(
            store.transition(&missing, JobStatus::Running, None),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_idempotency_first_submission_wins() {
        let store = JobStore::new();
        let first = JobGroupId::new();
        let second = JobGroupId::new();

        store
            .create(vec![job("https://a.example/", &first, Some("t"))], Some("k"))
            .unwrap();

        let err = store
            .create(vec![job("https://a.example/", &second, Some("t"))], Some("k"))
            .unwrap_err();
        match err {
            Error::Conflict { job_group_id } => assert_eq!(job_group_id, first),
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(store.len(), 1);
        assert!(store.group(&second).is_empty());
    }

    #[test]
    fn test_idempotency_scoped_by_tenant() {
        let store = JobStore::new();
        store
            .create(vec![job("https://a.example/", &JobGroupId::new(), Some("t1"))], Some("k"))
            .unwrap();
        store
            .create(vec![job("https://a.example/", &JobGroupId::new(), Some("t2"))], Some("k"))
            .unwrap();
        store
            .create(vec![job("https://a.example/", &JobGroupId::new(), None)], Some("k"))
            .unwrap();
        assert_eq!(store.len(), 3);
        assert!(store.lookup_idempotency(Some(&TenantId::must("t1")), "k").is_some());
        assert!(store.lookup_idempotency(Some(&TenantId::must("t3")), "k").is_none());
    }

    #[test]
    fn test_lazy_expiry_on_read() {
        let store = JobStore::new();
        let group = JobGroupId::new();
        let mut j = job("https://a.example/", &group, None);
        j.sla_deadline = Utc::now() - Duration::seconds(1);
        let id = j.job_id.clone();
        store.create(vec![j], None).unwrap();

        assert_eq!(store.get(&id).unwrap().status, JobStatus::Expired);
        assert!(store.transition(&id, JobStatus::Running, None).is_err());
    }

    #[test]
    fn test_expire_overdue_sweep() {
        let store = JobStore::new();
        let group = JobGroupId::new();
        let mut late = job("https://late.example/", &group, None);
        late.sla_deadline = Utc::now() + Duration::minutes(1);
        let fresh = job("https://fresh.example/", &group, None);
        store.create(vec![late, fresh], None).unwrap();

        assert_eq!(store.expire_overdue(Utc::now() + Duration::minutes(5)), 1);
        assert_eq!(store.count_by_status(JobStatus::Expired), 1);
        assert_eq!(store.count_by_status(JobStatus::Queued), 1);
    }

    #[test]
    fn test_discard_group_removes_jobs_and_key() {
        let store = JobStore::new();
        let group = JobGroupId::new();
        store
            .create(
                vec![
                    job("https://a.example/", &group, Some("t")),
                    job("https://b.example/", &group, Some("t")),
                ],
                Some("k"),
            )
            .unwrap();
        assert_eq!(store.group(&group).len(), 2);

        assert_eq!(store.discard_group(&group), 2);
        assert!(store.is_empty());
        assert!(store.lookup_idempotency(Some(&TenantId::must("t")), "k").is_none());
    }

    #[test]
    fn test_mixed_groups_rejected() {
        let store = JobStore::new();
        let a = job("https://a.example/", &JobGroupId::new(), None);
        let b = job("https://b.example/", &JobGroupId::new(), None);
        assert!(matches!(store.create(vec![a, b], None), Err(Error::Validation(_))));
        assert!(store.create(Vec::new(), None).is_err());
    }

    #[test]
    fn test_purge_terminal_respects_retention() {
        let store = JobStore::new();
        let group = JobGroupId::new();
        let done = job("https://done.example/", &group, Some("t"));
        let queued = job("https://queued.example/", &group, Some("t"));
        let done_id = done.job_id.clone();
        let queued_id = queued.job_id.clone();
        store.create(vec![done, queued], Some("k")).unwrap();
        store.transition(&done_id, JobStatus::Running, None).unwrap();
        store.transition(&done_id, JobStatus::Succeeded, None).unwrap();

        // Not old enough yet.
        assert_eq!(store.purge_terminal(Utc::now() - Duration::minutes(5)), 0);

        let later = Utc::now() + Duration::seconds(1);
        assert_eq!(store.purge_terminal(later), 1);
        assert!(matches!(store.get(&done_id), Err(Error::NotFound(_))));
        assert_eq!(store.group(&group).len(), 1);
        assert!(store.lookup_idempotency(Some(&TenantId::must("t")), "k").is_some());

        // The group and its key go once the last member is purged.
        store.transition(&queued_id, JobStatus::Running, None).unwrap();
        store.record_failure(&queued_id, "gone").unwrap();
        assert_eq!(store.purge_terminal(Utc::now() + Duration::seconds(1)), 1);
        assert!(store.is_empty());
        assert!(store.group(&group).is_empty());
        assert!(store.lookup_idempotency(Some(&TenantId::must("t")), "k").is_none());
    }
}

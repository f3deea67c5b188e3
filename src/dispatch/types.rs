//! Dispatch types: Priority, JobStatus, Job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{JobGroupId, JobId, TenantId};

/// Recrawl priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Dispatch rank (lower = dispatched first).
    pub fn rank(self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}

/// Job lifecycle state.
///
/// State transitions:
/// ```text
/// QUEUED → RUNNING → {SUCCEEDED | FAILED}
///    ↓         ↓
/// EXPIRED   EXPIRED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Expired,
}

impl JobStatus {
    /// Check if this is a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Expired
        )
    }

    /// Check if transition is valid.
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        matches!(
            (self, to),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Expired)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Expired)
        )
    }
}

/// A recrawl job as recorded by the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub url: String,
    pub priority: Priority,
    pub group_id: JobGroupId,
    pub tenant_id: Option<TenantId>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub not_before: Option<DateTime<Utc>>,
    pub estimated_start_time: DateTime<Utc>,
    pub sla_deadline: DateTime<Utc>,
    pub result: Option<serde_json::Value>,
    /// Diagnostic captured when the job failed.
    pub error: Option<String>,
    pub reason: Option<String>,
    pub callback_url: Option<String>,
}

impl Job {
    /// Whether the SLA deadline has passed without the job finishing.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && now > self.sla_deadline
    }

    /// Client-facing view of the job.
    pub fn view(&self) -> JobView {
        JobView {
            job_id: self.job_id.clone(),
            url: self.url.clone(),
            status: self.status,
            priority: self.priority,
            created_at: self.created_at,
            updated_at: self.updated_at,
            estimated_start_time: self.estimated_start_time,
            sla_deadline: self.sla_deadline,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}

/// Job status snapshot returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: JobId,
    pub url: String,
    pub status: JobStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub estimated_start_time: DateTime<Utc>,
    pub sla_deadline: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

//! Audit log: one timing/outcome record per finished job.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use itemflow_core::{JobId, JobKind};

use super::pagination::{Page, Pagination};
use super::results::StoreError;
use super::types::{Job, JobStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobAudit {
    pub job_id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total_tasks: u32,
    pub succeeded: u32,
    pub failed: u32,
    /// Rate-limit retries across all tasks.
    pub retries: u32,
    pub detail: Option<String>,
}

impl JobAudit {
    /// Build the audit record of a terminal job; `None` while it is still in flight.
    pub fn from_job(job: &Job) -> Option<Self> {
        if !job.status.is_terminal() {
            return None;
        }
        let finished_at = job.finished_at?;
        let started_at = job.started_at.unwrap_or(finished_at);

        Some(Self {
            job_id: job.id,
            kind: job.kind,
            status: job.status,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
            total_tasks: job.total_tasks as u32,
            succeeded: job.succeeded as u32,
            failed: job.failed as u32,
            retries: job.retries,
            detail: job.detail.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub kind: Option<JobKind>,
    pub status: Option<JobStatus>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn matches(&self, audit: &JobAudit) -> bool {
        self.kind.is_none_or(|k| audit.kind == k)
            && self.status.is_none_or(|s| audit.status == s)
            && self.started_after.is_none_or(|t| audit.started_at >= t)
            && self.started_before.is_none_or(|t| audit.started_at <= t)
    }
}

/// Written once per job, at terminal entry. Listings are newest start first.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Fails with `StoreError::Duplicate` if the job was already recorded.
    async fn record(&self, audit: JobAudit) -> Result<(), StoreError>;

    async fn get(&self, job_id: JobId) -> Result<Option<JobAudit>, StoreError>;

    async fn list(
        &self,
        filter: &AuditFilter,
        pagination: Pagination,
    ) -> Result<Page<JobAudit>, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    audits: RwLock<HashMap<JobId, JobAudit>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn record(&self, audit: JobAudit) -> Result<(), StoreError> {
        let mut audits = self
            .audits
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;

        if audits.contains_key(&audit.job_id) {
            return Err(StoreError::Duplicate(format!("audit for job {}", audit.job_id)));
        }
        audits.insert(audit.job_id, audit);
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobAudit>, StoreError> {
        let audits = self
            .audits
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;
        Ok(audits.get(&job_id).cloned())
    }

    async fn list(
        &self,
        filter: &AuditFilter,
        pagination: Pagination,
    ) -> Result<Page<JobAudit>, StoreError> {
        let audits = self
            .audits
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;

        let mut matching: Vec<JobAudit> =
            audits.values().filter(|a| filter.matches(a)).cloned().collect();
        matching.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.job_id.cmp(&a.job_id))
        });

        Ok(pagination.apply(matching))
    }
}

//! Submission gateway and query facade over the orchestration components.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, instrument};

use itemflow_core::{DomainError, JobId, JobKind, JobParams, TargetIds};
use itemflow_providers::{ProviderError, ProviderFactory};

use super::audit::{AuditFilter, AuditLog, JobAudit};
use super::executor::{ExecutorConfig, TaskExecutor};
use super::ledger::{IdempotencyLedger, LedgerError};
use super::pagination::{Page, Pagination};
use super::registry::{CancelOutcome, JobFilter, JobRegistry, RegistryError};
use super::results::{ResultFilter, ResultStore, StoreError, StoredResult};
use super::types::{Job, JobStatus};

/// Error taxonomy surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// Bad input; no job was created.
    #[error("{message}")]
    Validation {
        message: String,
        /// Set when the requested model is unknown.
        available_models: Option<Vec<String>>,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("external service unavailable: {0}")]
    ExternalUnavailable(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl JobError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            available_models: None,
        }
    }
}

impl From<DomainError> for JobError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => JobError::validation(msg),
            other => JobError::Storage(other.to_string()),
        }
    }
}

impl From<LedgerError> for JobError {
    fn from(e: LedgerError) -> Self {
        JobError::validation(e.to_string())
    }
}

impl From<RegistryError> for JobError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(id) => JobError::NotFound(format!("job {id}")),
            other => JobError::Storage(other.to_string()),
        }
    }
}

impl From<StoreError> for JobError {
    fn from(e: StoreError) -> Self {
        JobError::Storage(e.to_string())
    }
}

impl From<ProviderError> for JobError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::UnknownModel { model, available } => JobError::Validation {
                message: format!("Model '{model}' not available"),
                available_models: Some(available),
            },
            other => JobError::ExternalUnavailable(other.to_string()),
        }
    }
}

/// Outcome of [`JobService::submit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub job_id: JobId,
    /// `false` when an earlier submission with the same key was returned.
    pub created: bool,
    pub status: JobStatus,
}

pub struct JobService {
    ledger: IdempotencyLedger,
    registry: Arc<JobRegistry>,
    results: Arc<dyn ResultStore>,
    audit: Arc<dyn AuditLog>,
    providers: Arc<dyn ProviderFactory>,
    executor: Arc<TaskExecutor>,
}

impl JobService {
    pub fn new(
        results: Arc<dyn ResultStore>,
        audit: Arc<dyn AuditLog>,
        providers: Arc<dyn ProviderFactory>,
        config: ExecutorConfig,
    ) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let executor = Arc::new(TaskExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&results),
            Arc::clone(&audit),
            Arc::clone(&providers),
            config,
        ));

        Self {
            ledger: IdempotencyLedger::new(),
            registry,
            results,
            audit,
            providers,
            executor,
        }
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    /// Validate, deduplicate, register and dispatch a job.
    ///
    /// Keys are scoped per job kind. Validation happens before the ledger is
    /// consulted, so a rejected request never claims a key.
    #[instrument(skip(self, target_ids, params), fields(kind = %params.kind()), err)]
    pub async fn submit(
        &self,
        target_ids: Vec<String>,
        params: JobParams,
        idempotency_key: Option<&str>,
    ) -> Result<Submission, JobError> {
        let target_ids = TargetIds::new(target_ids)?;

        if let Some(enrichment) = params.enrichment() {
            let catalog = self.providers.model_catalog()?;
            catalog.ensure_model(&enrichment.model).await?;
        }

        let kind = params.kind();
        let key = idempotency_key.map(|k| k.trim().to_string());
        let create = || -> Result<JobId, JobError> {
            let job = Job::new(target_ids, params, key.clone());
            Ok(self.registry.create(job)?)
        };

        let (job_id, created) = match key.as_deref() {
            Some(k) => {
                let reservation = self.ledger.reserve(&format!("{kind}:{k}"), create)?;
                (reservation.job_id, reservation.created)
            }
            None => (create()?, true),
        };

        if created {
            info!(job_id = %job_id, "job accepted");
            self.executor.spawn(job_id);
        } else {
            info!(job_id = %job_id, "duplicate submission");
        }

        let status = self.registry.get(job_id)?.status;
        Ok(Submission {
            job_id,
            created,
            status,
        })
    }

    pub fn get_job(&self, job_id: JobId) -> Result<Job, JobError> {
        Ok(self.registry.get(job_id)?)
    }

    pub fn list_jobs(&self, filter: &JobFilter, pagination: Pagination) -> Page<Job> {
        self.registry.list(filter, pagination)
    }

    pub fn cancel_job(&self, job_id: JobId) -> Result<CancelOutcome, JobError> {
        Ok(self.registry.request_cancel(job_id)?)
    }

    /// Latest record of `kind` for a target.
    pub async fn get_result(&self, kind: JobKind, target_id: &str) -> Result<StoredResult, JobError> {
        self.results
            .latest(kind, target_id)
            .await?
            .ok_or_else(|| JobError::NotFound(format!("{kind} result for item {target_id}")))
    }

    pub async fn result_history(
        &self,
        kind: Option<JobKind>,
        target_id: &str,
    ) -> Result<Vec<StoredResult>, JobError> {
        Ok(self.results.history(kind, target_id).await?)
    }

    pub async fn list_results(
        &self,
        filter: &ResultFilter,
        pagination: Pagination,
    ) -> Result<Page<StoredResult>, JobError> {
        Ok(self.results.list(filter, pagination).await?)
    }

    /// Every record a job produced, newest first.
    ///
    /// Pages through the store; records appended while paging shift later
    /// pages, so repeats are dropped by record id.
    pub async fn job_results(&self, job_id: JobId) -> Result<Vec<StoredResult>, JobError> {
        let filter = ResultFilter {
            job_id: Some(job_id),
            ..Default::default()
        };
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        let mut offset = 0;

        loop {
            let page = self
                .results
                .list(&filter, Pagination::new(Some(Pagination::MAX_LIMIT), Some(offset)))
                .await?;
            let fetched = page.items.len() as u32;
            records.extend(page.items.into_iter().filter(|r| seen.insert(r.id)));

            if !page.has_more || fetched == 0 {
                return Ok(records);
            }
            offset += fetched;
        }
    }

    pub async fn list_models(&self) -> Result<Vec<String>, JobError> {
        let catalog = self.providers.model_catalog()?;
        Ok(catalog.list_models().await?)
    }

    pub async fn get_audit(&self, job_id: JobId) -> Result<JobAudit, JobError> {
        self.audit
            .get(job_id)
            .await?
            .ok_or_else(|| JobError::NotFound(format!("audit for job {job_id}")))
    }

    pub async fn list_audits(
        &self,
        filter: &AuditFilter,
        pagination: Pagination,
    ) -> Result<Page<JobAudit>, JobError> {
        Ok(self.audit.list(filter, pagination).await?)
    }

    /// Poll until the job is terminal or `timeout` elapses; returns the last snapshot.
    pub async fn wait_for_terminal(&self, job_id: JobId, timeout: Duration) -> Result<Job, JobError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self.get_job(job_id)?;
            if job.status.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(job);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

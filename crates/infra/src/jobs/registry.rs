//! Job registry: owns job records and applies their state machine.
//!
//! Each job sits behind its own mutex so task reports for different jobs never
//! contend; the outer map lock is held only for lookups and inserts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use itemflow_core::{DomainError, JobId, JobKind};

use super::pagination::{Page, Pagination};
use super::types::{Job, JobStatus, TaskReport};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Filter criteria for job listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    pub kind: Option<JobKind>,
    pub status: Option<JobStatus>,
}

impl JobFilter {
    pub fn kind(kind: JobKind) -> Self {
        Self {
            kind: Some(kind),
            status: None,
        }
    }

    fn matches(&self, job: &Job) -> bool {
        self.kind.is_none_or(|k| job.kind == k) && self.status.is_none_or(|s| job.status == s)
    }
}

/// Result of a cancellation request.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// The flag was set; undispatched tasks will not run.
    Requested(Job),
    /// The job had already finished; nothing changed.
    AlreadyTerminal(Job),
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<Mutex<Job>>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: JobId) -> Result<Arc<Mutex<Job>>, RegistryError> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(&id).cloned().ok_or(RegistryError::NotFound(id))
    }

    fn with_job<T>(
        &self,
        id: JobId,
        f: impl FnOnce(&mut Job) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let entry = self.entry(id)?;
        let mut job = entry.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut job)
    }

    /// Register a freshly created job (status `queued`, all tasks pending).
    pub fn create(&self, job: Job) -> Result<JobId, RegistryError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(&job.id) {
            return Err(RegistryError::AlreadyExists(job.id));
        }
        let id = job.id;
        debug!(job_id = %id, kind = %job.kind, total_tasks = job.total_tasks, "job registered");
        jobs.insert(id, Arc::new(Mutex::new(job)));
        Ok(id)
    }

    pub fn get(&self, id: JobId) -> Result<Job, RegistryError> {
        self.with_job(id, |job| Ok(job.clone()))
    }

    /// Newest first.
    pub fn list(&self, filter: &JobFilter, pagination: Pagination) -> Page<Job> {
        let entries: Vec<Arc<Mutex<Job>>> = {
            let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
            jobs.values().cloned().collect()
        };

        let mut matching: Vec<Job> = entries
            .iter()
            .map(|e| e.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .filter(|j| filter.matches(j))
            .collect();

        matching.sort_by(|a, b| {
            b.submitted_at
                .cmp(&a.submitted_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        pagination.apply(matching)
    }

    pub fn mark_running(&self, id: JobId) -> Result<Job, RegistryError> {
        self.with_job(id, |job| {
            job.mark_running()?;
            info!(job_id = %id, kind = %job.kind, "job running");
            Ok(job.clone())
        })
    }

    /// Apply a task report; returns the terminal snapshot if this report
    /// completed the job.
    pub fn record_task(&self, id: JobId, report: &TaskReport) -> Result<Option<Job>, RegistryError> {
        self.with_job(id, |job| {
            let terminal = job.apply_report(report)?;
            if terminal {
                info!(
                    job_id = %id,
                    status = %job.status,
                    succeeded = job.succeeded,
                    failed = job.failed,
                    retries = job.retries,
                    "job finished"
                );
                Ok(Some(job.clone()))
            } else {
                Ok(None)
            }
        })
    }

    /// Job-level fatal error detected before dispatch.
    pub fn fail_job(&self, id: JobId, reason: &str) -> Result<Job, RegistryError> {
        self.with_job(id, |job| {
            job.fail_before_dispatch(reason)?;
            info!(job_id = %id, reason, "job failed before dispatch");
            Ok(job.clone())
        })
    }

    pub fn request_cancel(&self, id: JobId) -> Result<CancelOutcome, RegistryError> {
        self.with_job(id, |job| {
            if job.status.is_terminal() {
                return Ok(CancelOutcome::AlreadyTerminal(job.clone()));
            }
            job.cancel_requested = true;
            info!(job_id = %id, "cancellation requested");
            Ok(CancelOutcome::Requested(job.clone()))
        })
    }

    pub fn is_cancel_requested(&self, id: JobId) -> bool {
        self.with_job(id, |job| Ok(job.cancel_requested))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itemflow_core::{JobParams, TargetIds};

    use crate::jobs::types::TaskOutcome;

    fn new_job(ids: &[&str]) -> Job {
        Job::new(
            TargetIds::new(ids.iter().copied()).unwrap(),
            JobParams::Extraction,
            None,
        )
    }

    #[test]
    fn unknown_job_is_not_found() {
        let registry = JobRegistry::new();
        let id = JobId::new();
        assert_eq!(registry.get(id), Err(RegistryError::NotFound(id)));
    }

    #[test]
    fn terminal_transition_fires_once() {
        let registry = JobRegistry::new();
        let id = registry.create(new_job(&["A", "B"])).unwrap();
        registry.mark_running(id).unwrap();

        assert!(registry.record_task(id, &TaskReport::success(0, 1)).unwrap().is_none());
        let done = registry
            .record_task(id, &TaskReport::failed(1, 1, "boom"))
            .unwrap()
            .unwrap();
        assert_eq!(done.status, JobStatus::PartiallyFailed);

        // Nothing leaves a terminal state.
        assert!(registry.mark_running(id).is_err());
        assert!(registry.fail_job(id, "late").is_err());
        assert_eq!(registry.get(id).unwrap(), done);
    }

    #[test]
    fn cancelling_a_finished_job_is_a_no_op() {
        let registry = JobRegistry::new();
        let id = registry.create(new_job(&["A"])).unwrap();
        registry.fail_job(id, "missing credential").unwrap();

        match registry.request_cancel(id).unwrap() {
            CancelOutcome::AlreadyTerminal(job) => assert!(!job.cancel_requested),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(!registry.is_cancel_requested(id));
    }

    #[test]
    fn list_filters_and_orders_newest_first() {
        let registry = JobRegistry::new();
        let first = registry.create(new_job(&["A"])).unwrap();
        let second = registry.create(new_job(&["B"])).unwrap();
        registry.fail_job(first, "x").unwrap();

        let all = registry.list(&JobFilter::default(), Pagination::default());
        assert_eq!(all.total, 2);
        assert!(all.items[0].submitted_at >= all.items[1].submitted_at);
        assert!(all.items.iter().any(|j| j.id == second));

        let failed = registry.list(
            &JobFilter {
                status: Some(JobStatus::Failed),
                ..Default::default()
            },
            Pagination::default(),
        );
        assert_eq!(failed.items.len(), 1);
        assert_eq!(failed.items[0].id, first);
    }

    #[test]
    fn concurrent_reports_keep_counters_consistent() {
        let registry = Arc::new(JobRegistry::new());
        let ids: Vec<String> = (0..64).map(|i| format!("T{i}")).collect();
        let job = Job::new(TargetIds::new(ids).unwrap(), JobParams::Extraction, None);
        let id = registry.create(job).unwrap();
        registry.mark_running(id).unwrap();

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let report = if i % 3 == 0 {
                        TaskReport::failed(i, 1, "nope")
                    } else {
                        TaskReport::success(i, 1)
                    };
                    registry.record_task(id, &report).unwrap()
                })
            })
            .collect();

        let terminal: Vec<Job> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(terminal.len(), 1);
        let job = registry.get(id).unwrap();
        assert_eq!(job.succeeded + job.failed, 64);
        assert_eq!(job.failed, 22);
        assert!(job.tasks.iter().all(|t| t.outcome != TaskOutcome::Pending));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 64,
                ..ProptestConfig::default()
            })]

            /// Property: counters only add up to the total at terminal entry.
            #[test]
            fn counters_reach_total_only_at_terminal(outcomes in prop::collection::vec(any::<bool>(), 1..24)) {
                let registry = JobRegistry::new();
                let ids: Vec<String> = (0..outcomes.len()).map(|i| format!("T{i}")).collect();
                let id = registry
                    .create(Job::new(TargetIds::new(ids).unwrap(), JobParams::Extraction, None))
                    .unwrap();
                registry.mark_running(id).unwrap();

                for (i, ok) in outcomes.iter().enumerate() {
                    let report = if *ok {
                        TaskReport::success(i, 1)
                    } else {
                        TaskReport::failed(i, 1, "x")
                    };
                    let terminal = registry.record_task(id, &report).unwrap();
                    let job = registry.get(id).unwrap();

                    let done = job.succeeded + job.failed == job.total_tasks;
                    prop_assert_eq!(done, terminal.is_some());
                    prop_assert_eq!(done, job.status.is_terminal());
                    prop_assert_eq!(done, job.finished_at.is_some());
                }
            }
        }
    }
}

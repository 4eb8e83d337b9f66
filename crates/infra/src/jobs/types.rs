//! Core job types and policies.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use itemflow_core::{DomainError, DomainResult, JobId, JobKind, JobParams, TargetIds};

/// Job execution status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, no task dispatched yet
    Queued,
    /// Claimed by an executor
    Running,
    /// Every task succeeded
    Succeeded,
    /// At least one success and at least one terminal failure
    PartiallyFailed,
    /// Every task failed, or the job failed as a whole
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::PartiallyFailed | JobStatus::Failed
        )
    }

    /// `queued -> running -> {succeeded, partially_failed, failed}`, plus
    /// `queued -> failed` for a job that could not be dispatched at all.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Failed)
                | (Running, Succeeded)
                | (Running, PartiallyFailed)
                | (Running, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::PartiallyFailed => "partially_failed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "partially_failed" => Ok(JobStatus::PartiallyFailed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::validation(format!("unknown job status '{other}'"))),
        }
    }
}

/// Outcome of a single task.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Pending,
    Success,
    /// Rate limited; waiting for another attempt
    FailedRetryable,
    FailedTerminal,
}

impl TaskOutcome {
    pub fn is_final(&self) -> bool {
        matches!(self, TaskOutcome::Success | TaskOutcome::FailedTerminal)
    }
}

/// Work item for one target id of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub target_id: String,
    pub attempts: u32,
    pub outcome: TaskOutcome,
    pub last_error: Option<String>,
}

impl Task {
    fn new(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            attempts: 0,
            outcome: TaskOutcome::Pending,
            last_error: None,
        }
    }
}

/// Progress report sent by a task worker to its job driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    /// Position of the task within the job.
    pub index: usize,
    pub attempts: u32,
    pub outcome: TaskOutcome,
    pub error: Option<String>,
}

impl TaskReport {
    pub fn success(index: usize, attempts: u32) -> Self {
        Self {
            index,
            attempts,
            outcome: TaskOutcome::Success,
            error: None,
        }
    }

    pub fn retrying(index: usize, attempts: u32, error: impl Into<String>) -> Self {
        Self {
            index,
            attempts,
            outcome: TaskOutcome::FailedRetryable,
            error: Some(error.into()),
        }
    }

    pub fn failed(index: usize, attempts: u32, error: impl Into<String>) -> Self {
        Self {
            index,
            attempts,
            outcome: TaskOutcome::FailedTerminal,
            error: Some(error.into()),
        }
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt-1)
    #[default]
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

impl BackoffStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackoffStrategy::Fixed => "fixed",
            BackoffStrategy::Exponential => "exponential",
            BackoffStrategy::Linear => "linear",
        }
    }
}

impl FromStr for BackoffStrategy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fixed" => Ok(BackoffStrategy::Fixed),
            "exponential" => Ok(BackoffStrategy::Exponential),
            "linear" => Ok(BackoffStrategy::Linear),
            other => Err(DomainError::validation(format!("unknown backoff strategy '{other}'"))),
        }
    }
}

/// Retry policy applied to rate-limited collaborator calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (0 = no retries)
    pub max_retries: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Growing backoff (`Exponential` or `Linear`) with 10% jitter; `Fixed`
    /// waits `base_delay` every time, without jitter.
    pub fn new(
        strategy: BackoffStrategy,
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        match strategy {
            BackoffStrategy::Fixed => Self::fixed(max_retries, base_delay),
            _ => Self {
                max_retries,
                base_delay,
                max_delay,
                strategy,
                jitter: 0.1,
            },
        }
    }

    /// Delay before retry number `retry` (1-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi((retry - 1).min(30) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => (base_ms * retry as f64).min(max_ms),
        };

        // Deterministic jitter derived from the retry number
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((retry as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    /// Whether another retry is allowed after `retries_so_far` retries.
    pub fn should_retry(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries
    }
}

/// A submitted job and its tasks.
///
/// Snapshots handed out by the registry are clones of this record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub target_ids: TargetIds,
    pub params: JobParams,
    pub idempotency_key: Option<String>,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_tasks: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Rate-limit retries across all tasks.
    pub retries: u32,
    pub detail: Option<String>,
    pub cancel_requested: bool,
    pub tasks: Vec<Task>,
}

impl Job {
    pub fn new(target_ids: TargetIds, params: JobParams, idempotency_key: Option<String>) -> Self {
        let tasks: Vec<Task> = target_ids.iter().map(Task::new).collect();
        Self {
            id: JobId::new(),
            kind: params.kind(),
            total_tasks: tasks.len(),
            target_ids,
            params,
            idempotency_key,
            status: JobStatus::Queued,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            succeeded: 0,
            failed: 0,
            retries: 0,
            detail: None,
            cancel_requested: false,
            tasks,
        }
    }

    fn transition(&mut self, next: JobStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::illegal_transition(format!(
                "job {}: {} -> {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Mark job as running.
    pub fn mark_running(&mut self) -> DomainResult<()> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Apply a task report. Returns `true` when the job entered a terminal state.
    pub fn apply_report(&mut self, report: &TaskReport) -> DomainResult<bool> {
        if self.status != JobStatus::Running {
            return Err(DomainError::invariant(format!(
                "job {} is {}, cannot record task results",
                self.id, self.status
            )));
        }

        let task = self.tasks.get_mut(report.index).ok_or_else(|| {
            DomainError::invariant(format!("job {} has no task #{}", self.id, report.index))
        })?;

        if task.outcome.is_final() {
            return Err(DomainError::invariant(format!(
                "task #{} of job {} already resolved",
                report.index, self.id
            )));
        }

        let seen = task.attempts.saturating_sub(1);
        self.retries += report.attempts.saturating_sub(1).saturating_sub(seen);

        task.attempts = report.attempts;
        task.outcome = report.outcome;
        if report.error.is_some() {
            task.last_error = report.error.clone();
        }

        match report.outcome {
            TaskOutcome::Success => self.succeeded += 1,
            TaskOutcome::FailedTerminal => self.failed += 1,
            TaskOutcome::Pending | TaskOutcome::FailedRetryable => {}
        }

        if self.succeeded + self.failed < self.total_tasks {
            return Ok(false);
        }

        let status = if self.failed == 0 {
            JobStatus::Succeeded
        } else if self.succeeded == 0 {
            JobStatus::Failed
        } else {
            JobStatus::PartiallyFailed
        };
        self.finish(status)?;
        Ok(true)
    }

    /// Fail the job before any task was dispatched.
    ///
    /// Every task is recorded as failed-terminal with `reason`.
    pub fn fail_before_dispatch(&mut self, reason: impl Into<String>) -> DomainResult<()> {
        let reason = reason.into();
        self.transition(JobStatus::Failed)?;

        for task in &mut self.tasks {
            task.outcome = TaskOutcome::FailedTerminal;
            task.last_error = Some(reason.clone());
        }
        self.failed = self.total_tasks;
        self.succeeded = 0;

        let now = Utc::now();
        self.started_at = Some(now);
        self.finished_at = Some(now);
        self.detail = Some(reason);
        Ok(())
    }

    fn finish(&mut self, status: JobStatus) -> DomainResult<()> {
        self.transition(status)?;
        self.finished_at = Some(Utc::now());
        self.detail = Some(self.summary());
        Ok(())
    }

    fn summary(&self) -> String {
        let mut summary = match self.status {
            JobStatus::Succeeded => format!("all {} tasks succeeded", self.total_tasks),
            _ => format!(
                "{} of {} tasks failed",
                self.failed, self.total_tasks
            ),
        };

        if self.cancel_requested {
            summary.push_str(" (cancelled)");
        }

        if let Some(err) = self
            .tasks
            .iter()
            .filter(|t| t.outcome == TaskOutcome::FailedTerminal)
            .find_map(|t| t.last_error.as_deref())
        {
            summary.push_str("; first error: ");
            summary.push_str(err);
        }
        summary
    }

    /// Wall-clock duration between start and finish, if both are known.
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

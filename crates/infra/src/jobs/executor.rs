//! Task executor: runs the per-target tasks of a job on a bounded worker pool.
//!
//! ## Shape
//!
//! - One **driver** per job. It claims the job, dispatches tasks in order and is
//!   the only writer of that job's registry record: workers never touch the
//!   registry, they send [`TaskReport`]s over a channel.
//! - A **semaphore** shared by every job of the executor bounds the number of
//!   in-flight collaborator calls.
//! - A worker that hits a rate limit gives its permit back while it sleeps.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, debug, error, info, info_span, warn};

use itemflow_core::{EnrichmentParams, JobId, JobKind, JobParams};
use itemflow_providers::{CallOutcome, ContentSource, Enricher, ProviderFactory, SourceContent};

use super::audit::{AuditLog, JobAudit};
use super::governor::RateLimitGovernor;
use super::registry::{JobRegistry, RegistryError};
use super::results::{NewResult, ResultContent, ResultStore};
use super::types::{Job, RetryPolicy, TaskReport};

/// Reason recorded on tasks that never ran because the job was cancelled.
pub const CANCELLED_BEFORE_DISPATCH: &str = "cancelled before dispatch";

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum concurrent collaborator calls across all jobs
    pub pool_size: usize,
    pub retry_policy: RetryPolicy,
    /// Upper bound for a single collaborator call
    pub call_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            retry_policy: RetryPolicy::default(),
            call_timeout: Duration::from_secs(20),
        }
    }
}

impl ExecutorConfig {
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// Runs jobs registered in a [`JobRegistry`].
pub struct TaskExecutor {
    registry: Arc<JobRegistry>,
    results: Arc<dyn ResultStore>,
    audit: Arc<dyn AuditLog>,
    providers: Arc<dyn ProviderFactory>,
    permits: Arc<Semaphore>,
    source_governor: Arc<RateLimitGovernor>,
    enricher_governor: Arc<RateLimitGovernor>,
    config: ExecutorConfig,
}

impl TaskExecutor {
    pub fn new(
        registry: Arc<JobRegistry>,
        results: Arc<dyn ResultStore>,
        audit: Arc<dyn AuditLog>,
        providers: Arc<dyn ProviderFactory>,
        config: ExecutorConfig,
    ) -> Self {
        let pool_size = config.pool_size.max(1);
        let fallback = config.retry_policy.base_delay;
        Self {
            registry,
            results,
            audit,
            providers,
            permits: Arc::new(Semaphore::new(pool_size)),
            source_governor: Arc::new(RateLimitGovernor::new("content_source", fallback)),
            enricher_governor: Arc::new(RateLimitGovernor::new("enricher", fallback)),
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn source_governor(&self) -> &RateLimitGovernor {
        &self.source_governor
    }

    pub fn enricher_governor(&self) -> &RateLimitGovernor {
        &self.enricher_governor
    }

    /// Run a queued job in the background.
    pub fn spawn(self: &Arc<Self>, job_id: JobId) -> JoinHandle<()> {
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = executor.run_job(job_id).await {
                error!(job_id = %job_id, error = %e, "job driver failed");
            }
        })
    }

    /// Drive a queued job to a terminal state and return the final snapshot.
    pub async fn run_job(&self, job_id: JobId) -> Result<Job, RegistryError> {
        let job = self.registry.get(job_id)?;
        let span = info_span!("job", job_id = %job_id, kind = %job.kind);
        self.drive(job).instrument(span).await
    }

    async fn drive(&self, job: Job) -> Result<Job, RegistryError> {
        let job_id = job.id;

        let ctx = match self.build_context(&job) {
            Ok(ctx) => Arc::new(ctx),
            Err(reason) => {
                warn!(reason = %reason, "capability construction failed");
                let failed = self.registry.fail_job(job_id, &reason)?;
                self.write_audit(&failed).await;
                return Ok(failed);
            }
        };

        let job = self.registry.mark_running(job_id)?;
        let (tx, mut rx) = mpsc::unbounded_channel::<TaskReport>();
        let mut workers = JoinSet::new();
        let mut resolved = vec![false; job.total_tasks];
        let mut terminal: Option<Job> = None;

        let mut pending: VecDeque<(usize, String)> = job
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (i, t.target_id.clone()))
            .collect();

        while !pending.is_empty() {
            if self.registry.is_cancel_requested(job_id) {
                self.skip_pending(job_id, &mut pending, &mut resolved, &mut terminal)
                    .await;
                break;
            }

            tokio::select! {
                biased;
                Some(report) = rx.recv() => {
                    self.apply(job_id, report, &mut resolved, &mut terminal).await;
                }
                permit = Arc::clone(&self.permits).acquire_owned() => {
                    let Ok(permit) = permit else {
                        for (index, _) in pending.drain(..) {
                            let report = TaskReport::failed(index, 0, "executor shut down");
                            self.apply(job_id, report, &mut resolved, &mut terminal).await;
                        }
                        break;
                    };
                    // The wait for a slot may have outlasted a cancel request.
                    if self.registry.is_cancel_requested(job_id) {
                        drop(permit);
                        self.skip_pending(job_id, &mut pending, &mut resolved, &mut terminal)
                            .await;
                        break;
                    }
                    if let Some((index, target_id)) = pending.pop_front() {
                        let worker = TaskWorker {
                            ctx: Arc::clone(&ctx),
                            permits: Arc::clone(&self.permits),
                            permit: Some(permit),
                            index,
                            target_id: target_id.clone(),
                            retries: 0,
                            tx: tx.clone(),
                        };
                        let span = info_span!("task", target_id = %target_id, index);
                        workers.spawn(worker.run().instrument(span));
                    }
                }
            }
        }

        drop(tx);
        while let Some(report) = rx.recv().await {
            self.apply(job_id, report, &mut resolved, &mut terminal).await;
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "task worker panicked");
            }
        }

        // A worker that died without a final report must not leave the job open.
        for index in 0..resolved.len() {
            if !resolved[index] {
                let report = TaskReport::failed(index, 1, "task worker aborted");
                self.apply(job_id, report, &mut resolved, &mut terminal).await;
            }
        }

        match terminal {
            Some(job) => Ok(job),
            None => self.registry.get(job_id),
        }
    }

    async fn skip_pending(
        &self,
        job_id: JobId,
        pending: &mut VecDeque<(usize, String)>,
        resolved: &mut [bool],
        terminal: &mut Option<Job>,
    ) {
        info!(undispatched = pending.len(), "cancellation observed; skipping remaining tasks");
        for (index, _) in pending.drain(..) {
            let report = TaskReport::failed(index, 0, CANCELLED_BEFORE_DISPATCH);
            self.apply(job_id, report, resolved, terminal).await;
        }
    }

    fn build_context(&self, job: &Job) -> Result<TaskContext, String> {
        let source = self.providers.content_source().map_err(|e| e.to_string())?;
        let enrichment = match &job.params {
            JobParams::Extraction => None,
            JobParams::Enrichment(params) => {
                let enricher = self
                    .providers
                    .enricher(&params.model)
                    .map_err(|e| e.to_string())?;
                Some((enricher, params.clone()))
            }
        };

        Ok(TaskContext {
            job_id: job.id,
            kind: job.kind,
            source,
            enrichment,
            results: Arc::clone(&self.results),
            source_governor: Arc::clone(&self.source_governor),
            enricher_governor: Arc::clone(&self.enricher_governor),
            policy: self.config.retry_policy.clone(),
            call_timeout: self.config.call_timeout,
        })
    }

    async fn apply(
        &self,
        job_id: JobId,
        report: TaskReport,
        resolved: &mut [bool],
        terminal: &mut Option<Job>,
    ) {
        let is_final = report.outcome.is_final();
        let index = report.index;

        match self.registry.record_task(job_id, &report) {
            Ok(Some(done)) => {
                self.write_audit(&done).await;
                *terminal = Some(done);
            }
            Ok(None) => {}
            Err(e) => warn!(index, error = %e, "task report rejected"),
        }

        if is_final {
            if let Some(slot) = resolved.get_mut(index) {
                *slot = true;
            }
        }
    }

    async fn write_audit(&self, job: &Job) {
        let Some(audit) = JobAudit::from_job(job) else {
            return;
        };
        if let Err(e) = self.audit.record(audit).await {
            error!(job_id = %job.id, error = %e, "failed to write job audit");
        }
    }
}

/// Per-job state shared by that job's workers.
struct TaskContext {
    job_id: JobId,
    kind: JobKind,
    source: Arc<dyn ContentSource>,
    enrichment: Option<(Arc<dyn Enricher>, EnrichmentParams)>,
    results: Arc<dyn ResultStore>,
    source_governor: Arc<RateLimitGovernor>,
    enricher_governor: Arc<RateLimitGovernor>,
    policy: RetryPolicy,
    call_timeout: Duration,
}

struct TaskWorker {
    ctx: Arc<TaskContext>,
    permits: Arc<Semaphore>,
    permit: Option<OwnedSemaphorePermit>,
    index: usize,
    target_id: String,
    /// Shared by every step of the task.
    retries: u32,
    tx: mpsc::UnboundedSender<TaskReport>,
}

impl TaskWorker {
    fn attempts(&self) -> u32 {
        self.retries + 1
    }

    fn report(&self, report: TaskReport) {
        // The driver outlives its workers; a closed channel means it is gone.
        let _ = self.tx.send(report);
    }

    async fn run(mut self) {
        let report = match self.execute().await {
            Ok(()) => TaskReport::success(self.index, self.attempts()),
            Err(reason) => {
                debug!(attempt = self.attempts(), reason = %reason, "task failed");
                TaskReport::failed(self.index, self.attempts(), reason)
            }
        };
        self.permit.take();
        self.report(report);
    }

    async fn execute(&mut self) -> Result<(), String> {
        let ctx = Arc::clone(&self.ctx);
        let target_id = self.target_id.clone();

        let content = self
            .call_with_retry(&ctx.source_governor, || {
                ctx.source.fetch_content(&target_id)
            })
            .await?;

        let record = match &ctx.enrichment {
            None => ResultContent::Extracted {
                description: content.text,
            },
            Some((enricher, params)) => {
                let enriched = self
                    .call_with_retry(&ctx.enricher_governor, || {
                        enricher.enrich_content(&content, params)
                    })
                    .await?;
                ResultContent::Enriched {
                    original_description: content.text.clone(),
                    enriched_description: enriched,
                }
            }
        };

        let stored = ctx
            .results
            .append(NewResult {
                target_id: target_id.clone(),
                job_id: ctx.job_id,
                content: record,
            })
            .await
            .map_err(|e| format!("failed to store result: {e}"))?;

        debug!(record_id = stored.id, kind = %ctx.kind, "result stored");
        Ok(())
    }

    /// Call a collaborator, retrying rate limits and timeouts within the
    /// task's retry budget.
    async fn call_with_retry<T, F, Fut>(
        &mut self,
        governor: &RateLimitGovernor,
        mut call: F,
    ) -> Result<T, String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CallOutcome<T>>,
    {
        let ctx = Arc::clone(&self.ctx);
        loop {
            let message = match tokio::time::timeout(ctx.call_timeout, call()).await {
                Ok(CallOutcome::Success(value)) => {
                    governor.observe_success();
                    return Ok(value);
                }
                Ok(CallOutcome::Fatal(message)) => return Err(message),
                Ok(CallOutcome::RateLimited {
                    retry_after,
                    message,
                }) => {
                    governor.observe_rate_limit(retry_after);
                    message
                }
                // Retryable, but not a throttling signal.
                Err(_) => format!(
                    "{} call timed out after {}ms",
                    governor.name(),
                    ctx.call_timeout.as_millis()
                ),
            };

            if !ctx.policy.should_retry(self.retries) {
                return Err(format!(
                    "gave up after {} retries: {message}",
                    self.retries
                ));
            }

            self.retries += 1;
            let delay = governor
                .current_delay()
                .max(ctx.policy.delay_for_retry(self.retries));

            warn!(
                attempt = self.attempts(),
                delay_ms = delay.as_millis() as u64,
                collaborator = governor.name(),
                "retryable failure; backing off"
            );
            self.report(TaskReport::retrying(self.index, self.attempts(), message));

            // Give the slot to someone else while waiting.
            self.permit.take();
            tokio::time::sleep(delay).await;
            match Arc::clone(&self.permits).acquire_owned().await {
                Ok(permit) => self.permit = Some(permit),
                Err(_) => return Err("executor shut down".to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use itemflow_core::TargetIds;
    use itemflow_providers::{
        MockContentSource, MockProviders, StaticModelCatalog,
    };

    use crate::jobs::audit::InMemoryAuditLog;
    use crate::jobs::results::{InMemoryResultStore, ResultFilter};
    use crate::jobs::pagination::Pagination;
    use crate::jobs::types::{JobStatus, TaskOutcome};

    struct Harness {
        registry: Arc<JobRegistry>,
        results: Arc<InMemoryResultStore>,
        audit: Arc<InMemoryAuditLog>,
        providers: MockProviders,
        executor: Arc<TaskExecutor>,
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::fixed(max_retries, Duration::from_millis(5))
    }

    fn harness(source: MockContentSource, config: ExecutorConfig) -> Harness {
        let providers = MockProviders::new(source, StaticModelCatalog::new(["m"]));
        harness_with(providers, config)
    }

    fn harness_with(providers: MockProviders, config: ExecutorConfig) -> Harness {
        let registry = Arc::new(JobRegistry::new());
        let results = Arc::new(InMemoryResultStore::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let executor = Arc::new(TaskExecutor::new(
            registry.clone(),
            results.clone(),
            audit.clone(),
            Arc::new(providers.clone()),
            config,
        ));
        Harness {
            registry,
            results,
            audit,
            providers,
            executor,
        }
    }

    fn submit(h: &Harness, ids: &[&str], params: JobParams) -> JobId {
        let job = Job::new(TargetIds::new(ids.iter().copied()).unwrap(), params, None);
        h.registry.create(job).unwrap()
    }

    fn items(ids: &[&str]) -> MockContentSource {
        ids.iter().fold(MockContentSource::new(), |source, id| {
            source.with_item(SourceContent::new(*id, format!("descripcion de {id}")))
        })
    }

    #[tokio::test]
    async fn rate_limited_task_recovers_and_job_succeeds() {
        let source = items(&["A", "B"]);
        source.script_error("B", "429 RESOURCE_EXHAUSTED. Please retry in 0.01s.");
        let h = harness(
            source,
            ExecutorConfig::default().with_retry_policy(fast_policy(3)),
        );

        let id = submit(&h, &["A", "B"], JobParams::Extraction);
        let job = h.executor.run_job(id).await.unwrap();

        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.succeeded, 2);
        assert_eq!(job.retries, 1);
        assert_eq!(h.providers.source.calls_for("B"), 2);

        let page = h
            .results
            .list(&ResultFilter::default(), Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(h.audit.get(id).await.unwrap().unwrap().retries, 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let source = items(&["A"]);
        for _ in 0..10 {
            source.script_error("A", "quota exceeded");
        }
        let h = harness(
            source,
            ExecutorConfig::default().with_retry_policy(fast_policy(2)),
        );

        let id = submit(&h, &["A"], JobParams::Extraction);
        let job = h.executor.run_job(id).await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.tasks[0].outcome, TaskOutcome::FailedTerminal);
        assert_eq!(job.tasks[0].attempts, 3);
        assert_eq!(h.providers.source.calls_for("A"), 3);
        assert!(job.tasks[0].last_error.as_deref().unwrap().starts_with("gave up after 2 retries"));
    }

    #[tokio::test]
    async fn fatal_errors_do_not_abort_siblings() {
        let h = harness(
            items(&["A", "C"]),
            ExecutorConfig::default().with_retry_policy(fast_policy(3)),
        );

        let id = submit(&h, &["A", "B", "C"], JobParams::Extraction);
        let job = h.executor.run_job(id).await.unwrap();

        assert_eq!(job.status, JobStatus::PartiallyFailed);
        assert_eq!((job.succeeded, job.failed), (2, 1));
        assert_eq!(h.providers.source.calls_for("B"), 1);
        assert_eq!(job.tasks[1].last_error.as_deref(), Some("item B not found"));
    }

    #[tokio::test]
    async fn missing_credential_fails_job_before_dispatch() {
        let providers = MockProviders::new(items(&["A", "B"]), StaticModelCatalog::new(["m"]))
            .requiring_credential(None);
        let h = harness_with(providers, ExecutorConfig::default());

        let params = JobParams::Enrichment(EnrichmentParams::new(None, None, "m").unwrap());
        let id = submit(&h, &["A", "B"], params);
        let job = h.executor.run_job(id).await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failed, 2);
        assert_eq!(h.providers.source.total_calls(), 0);
        assert!(job.detail.unwrap().contains("GEMINI_API_KEY"));
        assert!(h.audit.get(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn enrichment_stores_original_and_enriched_text() {
        let h = harness(
            items(&["A"]),
            ExecutorConfig::default().with_retry_policy(fast_policy(3)),
        );
        h.providers
            .enricher
            .script_error("A", "RESOURCE_EXHAUSTED retry in 0.01s");

        let params = JobParams::Enrichment(
            EnrichmentParams::new(Some("formal".into()), Some(20), "m").unwrap(),
        );
        let id = submit(&h, &["A"], params);
        let job = h.executor.run_job(id).await.unwrap();

        assert_eq!(job.status, JobStatus::Succeeded);
        // Only the enrich step was retried.
        assert_eq!(h.providers.source.calls_for("A"), 1);
        assert_eq!(h.providers.enricher.prompts().len(), 2);

        let record = h
            .results
            .latest(JobKind::Enrichment, "A")
            .await
            .unwrap()
            .unwrap();
        match record.content {
            ResultContent::Enriched {
                original_description,
                enriched_description,
            } => {
                assert_eq!(original_description, "descripcion de A");
                assert!(enriched_description.starts_with("[formal]"));
            }
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_calls_time_out_and_count_as_retries() {
        let source = items(&["A"]).with_latency(Duration::from_millis(200));
        let h = harness(
            source,
            ExecutorConfig::default()
                .with_retry_policy(fast_policy(1))
                .with_call_timeout(Duration::from_millis(10)),
        );

        let id = submit(&h, &["A"], JobParams::Extraction);
        let job = h.executor.run_job(id).await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retries, 1);
        assert!(job.tasks[0].last_error.as_deref().unwrap().contains("timed out"));
        // Timeouts are not throttling signals.
        assert_eq!(h.executor.source_governor().consecutive_rate_limits(), 0);
    }

    #[tokio::test]
    async fn cancellation_skips_undispatched_tasks() {
        let source = items(&["A", "B", "C", "D"]).with_latency(Duration::from_millis(50));
        let h = harness(source, ExecutorConfig::default().with_pool_size(1));

        let id = submit(&h, &["A", "B", "C", "D"], JobParams::Extraction);
        h.registry.request_cancel(id).unwrap();
        let job = h.executor.run_job(id).await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failed, 4);
        assert!(job
            .tasks
            .iter()
            .all(|t| t.last_error.as_deref() == Some(CANCELLED_BEFORE_DISPATCH)));
        assert_eq!(h.providers.source.total_calls(), 0);
    }

    #[tokio::test]
    async fn cancel_mid_flight_lets_running_tasks_finish() {
        let source = items(&["A", "B", "C"]).with_latency(Duration::from_millis(50));
        let h = harness(source, ExecutorConfig::default().with_pool_size(1));

        let id = submit(&h, &["A", "B", "C"], JobParams::Extraction);
        let run = h.executor.spawn(id);
        while h.executor.permits.available_permits() > 0 {
            tokio::task::yield_now().await;
        }
        h.registry.request_cancel(id).unwrap();
        run.await.unwrap();

        let job = h.registry.get(id).unwrap();
        assert_eq!(job.status, JobStatus::PartiallyFailed);
        assert_eq!((job.succeeded, job.failed), (1, 2));
        assert_eq!(job.tasks[0].outcome, TaskOutcome::Success);
        assert_eq!(h.providers.source.calls_for("A"), 1);
        assert_eq!(h.providers.source.calls_for("B"), 0);
        assert_eq!(h.providers.source.calls_for("C"), 0);
        assert_eq!(job.tasks[2].last_error.as_deref(), Some(CANCELLED_BEFORE_DISPATCH));
        assert!(h.audit.get(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cancel_while_waiting_for_a_slot_dispatches_nothing() {
        let source = items(&["X1", "Y1", "Y2"]).with_latency(Duration::from_millis(100));
        let h = harness(source, ExecutorConfig::default().with_pool_size(1));

        let x = submit(&h, &["X1"], JobParams::Extraction);
        let y = submit(&h, &["Y1", "Y2"], JobParams::Extraction);

        let x_run = h.executor.spawn(x);
        while h.executor.permits.available_permits() > 0 {
            tokio::task::yield_now().await;
        }
        // Y's driver is parked on the pool, which X holds.
        let y_run = h.executor.spawn(y);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.registry.get(y).unwrap().status, JobStatus::Running);
        assert_eq!(h.providers.source.calls_for("Y1"), 0);

        h.registry.request_cancel(y).unwrap();
        x_run.await.unwrap();
        y_run.await.unwrap();

        assert_eq!(h.registry.get(x).unwrap().status, JobStatus::Succeeded);
        let y_job = h.registry.get(y).unwrap();
        assert_eq!(y_job.status, JobStatus::Failed);
        assert_eq!(y_job.failed, 2);
        assert_eq!(h.providers.source.calls_for("Y1"), 0);
        assert_eq!(h.providers.source.calls_for("Y2"), 0);
    }

    /// Factory that serves a single content source.
    struct SourceProviders(Arc<dyn ContentSource>);

    impl ProviderFactory for SourceProviders {
        fn content_source(
            &self,
        ) -> Result<Arc<dyn ContentSource>, itemflow_providers::ProviderError> {
            Ok(self.0.clone())
        }

        fn enricher(
            &self,
            _model: &str,
        ) -> Result<Arc<dyn Enricher>, itemflow_providers::ProviderError> {
            Err(itemflow_providers::ProviderError::Unavailable("unused".into()))
        }

        fn model_catalog(
            &self,
        ) -> Result<Arc<dyn itemflow_providers::ModelCatalog>, itemflow_providers::ProviderError>
        {
            Ok(Arc::new(StaticModelCatalog::default()))
        }
    }

    /// Records when each fetch happened.
    struct StampedSource {
        inner: MockContentSource,
        stamps: std::sync::Mutex<Vec<(String, tokio::time::Instant)>>,
    }

    impl StampedSource {
        fn stamps_for(&self, target_id: &str) -> Vec<tokio::time::Instant> {
            self.stamps
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _)| id == target_id)
                .map(|(_, at)| *at)
                .collect()
        }
    }

    #[async_trait]
    impl ContentSource for StampedSource {
        async fn fetch_content(&self, target_id: &str) -> CallOutcome<SourceContent> {
            self.stamps
                .lock()
                .unwrap()
                .push((target_id.to_string(), tokio::time::Instant::now()));
            self.inner.fetch_content(target_id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_delays_sibling_retries() {
        let inner = items(&["A", "B"]);
        inner.script_error("A", "429 RESOURCE_EXHAUSTED. Please retry in 2s.");
        // No hint of its own: B would come back after the 5ms policy delay.
        inner.script_error("B", "429 RESOURCE_EXHAUSTED");
        let source = Arc::new(StampedSource {
            inner,
            stamps: std::sync::Mutex::new(Vec::new()),
        });

        let registry = Arc::new(JobRegistry::new());
        let executor = TaskExecutor::new(
            registry.clone(),
            Arc::new(InMemoryResultStore::new()),
            Arc::new(InMemoryAuditLog::new()),
            Arc::new(SourceProviders(source.clone())),
            ExecutorConfig::default()
                .with_pool_size(1)
                .with_retry_policy(fast_policy(3)),
        );

        let id = registry
            .create(Job::new(
                TargetIds::new(["A", "B"]).unwrap(),
                JobParams::Extraction,
                None,
            ))
            .unwrap();
        let job = executor.run_job(id).await.unwrap();

        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.retries, 2);

        let b = source.stamps_for("B");
        assert_eq!(b.len(), 2);
        assert!(b[1] - b[0] >= Duration::from_millis(1_990));
        assert_eq!(executor.source_governor().consecutive_rate_limits(), 0);
    }

    /// Counts concurrent fetches to check the pool bound.
    struct GaugedSource {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ContentSource for GaugedSource {
        async fn fetch_content(&self, target_id: &str) -> CallOutcome<SourceContent> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            CallOutcome::Success(SourceContent::new(target_id, "x"))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pool_size_bounds_concurrent_calls() {
        let source = Arc::new(GaugedSource {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let registry = Arc::new(JobRegistry::new());
        let executor = Arc::new(TaskExecutor::new(
            registry.clone(),
            Arc::new(InMemoryResultStore::new()),
            Arc::new(InMemoryAuditLog::new()),
            Arc::new(SourceProviders(source.clone())),
            ExecutorConfig::default().with_pool_size(2),
        ));

        let ids: Vec<String> = (0..10).map(|i| format!("T{i}")).collect();
        let first = registry
            .create(Job::new(TargetIds::new(ids.clone()).unwrap(), JobParams::Extraction, None))
            .unwrap();
        let second = registry
            .create(Job::new(TargetIds::new(ids).unwrap(), JobParams::Extraction, None))
            .unwrap();

        let (a, b) = tokio::join!(executor.run_job(first), executor.run_job(second));
        assert_eq!(a.unwrap().status, JobStatus::Succeeded);
        assert_eq!(b.unwrap().status, JobStatus::Succeeded);
        assert!(source.peak.load(Ordering::SeqCst) <= 2);
    }
}

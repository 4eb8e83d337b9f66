//! Job orchestration: submission with deduplication, lifecycle tracking,
//! concurrent task execution under rate limiting, result and audit storage.
//!
//! ## Components
//!
//! - `IdempotencyLedger`: deduplication key -> job id
//! - `JobRegistry`: job records and their state machine
//! - `TaskExecutor`: bounded worker pool running per-target tasks
//! - `RateLimitGovernor`: shared backoff window per collaborator
//! - `ResultStore`: append-only produced artifacts
//! - `AuditLog`: one record per finished job
//! - `JobService`: the facade the gateway talks to

pub mod audit;
pub mod executor;
pub mod governor;
pub mod ledger;
pub mod pagination;
pub mod registry;
pub mod results;
pub mod service;
pub mod types;

pub use audit::{AuditFilter, AuditLog, InMemoryAuditLog, JobAudit};
pub use executor::{CANCELLED_BEFORE_DISPATCH, ExecutorConfig, TaskExecutor};
pub use governor::RateLimitGovernor;
pub use ledger::{IdempotencyEntry, IdempotencyLedger, LedgerError, Reservation};
pub use pagination::{Page, Pagination};
pub use registry::{CancelOutcome, JobFilter, JobRegistry, RegistryError};
pub use results::{
    InMemoryResultStore, NewResult, RecordId, ResultContent, ResultFilter, ResultStore,
    StoreError, StoredResult,
};
pub use service::{JobError, JobService, Submission};
pub use types::{
    BackoffStrategy, Job, JobStatus, RetryPolicy, Task, TaskOutcome, TaskReport,
};

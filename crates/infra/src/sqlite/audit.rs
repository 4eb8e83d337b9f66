use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::instrument;

use itemflow_core::{JobId, JobKind};

use crate::jobs::{AuditFilter, AuditLog, JobAudit, JobStatus, Page, Pagination, StoreError};

use super::{decode, decode_time, encode_time, map_sqlx_error};

const COLUMNS: &str = "job_id, kind, status, started_at, finished_at, duration_ms, \
                       total_tasks, succeeded, failed, retries, detail";

const FILTER: &str = r#"
    (?1 IS NULL OR kind = ?1)
    AND (?2 IS NULL OR status = ?2)
    AND (?3 IS NULL OR started_at >= ?3)
    AND (?4 IS NULL OR started_at <= ?4)
"#;

/// SQLite-backed audit log. `job_id` is the primary key, so a second
/// record for the same job is rejected by the database.
#[derive(Debug, Clone)]
pub struct SqliteAuditLog {
    pool: SqlitePool,
}

impl SqliteAuditLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn from_row(row: &SqliteRow) -> Result<JobAudit, StoreError> {
    let get = |e: sqlx::Error| StoreError::Storage(format!("failed to read audit row: {e}"));

    let job_id: String = row.try_get("job_id").map_err(get)?;
    let kind: String = row.try_get("kind").map_err(get)?;
    let status: String = row.try_get("status").map_err(get)?;
    let started_at: String = row.try_get("started_at").map_err(get)?;
    let finished_at: String = row.try_get("finished_at").map_err(get)?;
    let duration_ms: i64 = row.try_get("duration_ms").map_err(get)?;
    let total_tasks: i64 = row.try_get("total_tasks").map_err(get)?;
    let succeeded: i64 = row.try_get("succeeded").map_err(get)?;
    let failed: i64 = row.try_get("failed").map_err(get)?;
    let retries: i64 = row.try_get("retries").map_err(get)?;

    Ok(JobAudit {
        job_id: decode::<JobId>("job_id", &job_id)?,
        kind: decode::<JobKind>("kind", &kind)?,
        status: decode::<JobStatus>("status", &status)?,
        started_at: decode_time("started_at", &started_at)?,
        finished_at: decode_time("finished_at", &finished_at)?,
        duration_ms: duration_ms.max(0) as u64,
        total_tasks: total_tasks.max(0) as u32,
        succeeded: succeeded.max(0) as u32,
        failed: failed.max(0) as u32,
        retries: retries.max(0) as u32,
        detail: row.try_get("detail").map_err(get)?,
    })
}

#[async_trait]
impl AuditLog for SqliteAuditLog {
    #[instrument(skip(self, audit), fields(job_id = %audit.job_id, status = %audit.status), err)]
    async fn record(&self, audit: JobAudit) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO job_audits ({COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ))
        .bind(audit.job_id.to_string())
        .bind(audit.kind.as_str())
        .bind(audit.status.as_str())
        .bind(encode_time(audit.started_at))
        .bind(encode_time(audit.finished_at))
        .bind(audit.duration_ms as i64)
        .bind(audit.total_tasks as i64)
        .bind(audit.succeeded as i64)
        .bind(audit.failed as i64)
        .bind(audit.retries as i64)
        .bind(&audit.detail)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_audit", e))?;

        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobAudit>, StoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM job_audits WHERE job_id = ?1"))
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_audit", e))?;

        row.as_ref().map(from_row).transpose()
    }

    async fn list(
        &self,
        filter: &AuditFilter,
        pagination: Pagination,
    ) -> Result<Page<JobAudit>, StoreError> {
        let kind = filter.kind.map(|k| k.as_str());
        let status = filter.status.map(|s| s.as_str());
        let after = filter.started_after.map(encode_time);
        let before = filter.started_before.map(encode_time);

        let count_row = sqlx::query(&format!("SELECT COUNT(*) AS total FROM job_audits WHERE {FILTER}"))
            .bind(kind)
            .bind(status)
            .bind(&after)
            .bind(&before)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_audits", e))?;

        let total: i64 = count_row
            .try_get("total")
            .map_err(|e| StoreError::Storage(format!("failed to read count: {e}")))?;

        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM job_audits WHERE {FILTER} \
             ORDER BY started_at DESC, job_id DESC LIMIT ?5 OFFSET ?6"
        ))
        .bind(kind)
        .bind(status)
        .bind(&after)
        .bind(&before)
        .bind(pagination.limit as i64)
        .bind(pagination.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_audits", e))?;

        let items = rows.iter().map(from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total.max(0) as u64, pagination))
    }
}

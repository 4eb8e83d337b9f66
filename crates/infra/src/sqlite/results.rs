use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::instrument;

use itemflow_core::{JobId, JobKind};

use crate::jobs::{
    NewResult, Page, Pagination, ResultContent, ResultFilter, ResultStore, StoreError,
    StoredResult,
};

use super::{decode, decode_time, encode_time, map_sqlx_error, now};

const COLUMNS: &str = "id, kind, target_id, job_id, original_content, content, created_at";

// Optional filters are bound as NULL when absent.
const FILTER: &str = r#"
    (?1 IS NULL OR kind = ?1)
    AND (?2 IS NULL OR target_id = ?2)
    AND (?3 IS NULL OR job_id = ?3)
    AND (?4 IS NULL OR content LIKE ?4 ESCAPE '\' OR original_content LIKE ?4 ESCAPE '\')
    AND (?5 IS NULL OR created_at >= ?5)
    AND (?6 IS NULL OR created_at <= ?6)
"#;

/// SQLite-backed append-only result store.
#[derive(Debug, Clone)]
pub struct SqliteResultStore {
    pool: SqlitePool,
}

impl SqliteResultStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

struct BoundFilter {
    kind: Option<&'static str>,
    target_id: Option<String>,
    job_id: Option<String>,
    q: Option<String>,
    created_from: Option<String>,
    created_to: Option<String>,
}

impl From<&ResultFilter> for BoundFilter {
    fn from(filter: &ResultFilter) -> Self {
        Self {
            kind: filter.kind.map(|k| k.as_str()),
            target_id: filter.target_id.clone(),
            job_id: filter.job_id.map(|j| j.to_string()),
            q: filter
                .q
                .as_deref()
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(|q| format!("%{}%", escape_like(q))),
            created_from: filter.created_from.map(encode_time),
            created_to: filter.created_to.map(encode_time),
        }
    }
}

/// Make `%`, `_` and `\` match literally under `LIKE ... ESCAPE '\'`.
fn escape_like(q: &str) -> String {
    let mut escaped = String::with_capacity(q.len());
    for c in q.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn from_row(row: &SqliteRow) -> Result<StoredResult, StoreError> {
    let get = |e: sqlx::Error| StoreError::Storage(format!("failed to read result row: {e}"));

    let kind: String = row.try_get("kind").map_err(get)?;
    let job_id: String = row.try_get("job_id").map_err(get)?;
    let created_at: String = row.try_get("created_at").map_err(get)?;
    let original: Option<String> = row.try_get("original_content").map_err(get)?;
    let content: String = row.try_get("content").map_err(get)?;

    let content = match decode::<JobKind>("kind", &kind)? {
        JobKind::Extraction => ResultContent::Extracted {
            description: content,
        },
        JobKind::Enrichment => ResultContent::Enriched {
            original_description: original.unwrap_or_default(),
            enriched_description: content,
        },
    };

    Ok(StoredResult {
        id: row.try_get("id").map_err(get)?,
        target_id: row.try_get("target_id").map_err(get)?,
        job_id: decode::<JobId>("job_id", &job_id)?,
        content,
        created_at: decode_time("created_at", &created_at)?,
    })
}

#[async_trait]
impl ResultStore for SqliteResultStore {
    #[instrument(skip(self, record), fields(target_id = %record.target_id, job_id = %record.job_id), err)]
    async fn append(&self, record: NewResult) -> Result<StoredResult, StoreError> {
        let created_at = now();

        let id = sqlx::query(
            r#"
            INSERT INTO results (kind, target_id, job_id, original_content, content, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(record.content.kind().as_str())
        .bind(&record.target_id)
        .bind(record.job_id.to_string())
        .bind(record.content.original())
        .bind(record.content.text())
        .bind(encode_time(created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_result", e))?
        .last_insert_rowid();

        Ok(StoredResult {
            id,
            target_id: record.target_id,
            job_id: record.job_id,
            content: record.content,
            created_at,
        })
    }

    async fn latest(
        &self,
        kind: JobKind,
        target_id: &str,
    ) -> Result<Option<StoredResult>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM results WHERE kind = ?1 AND target_id = ?2 \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(kind.as_str())
        .bind(target_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest_result", e))?;

        row.as_ref().map(from_row).transpose()
    }

    async fn history(
        &self,
        kind: Option<JobKind>,
        target_id: &str,
    ) -> Result<Vec<StoredResult>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM results WHERE (?1 IS NULL OR kind = ?1) AND target_id = ?2 \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(kind.map(|k| k.as_str()))
        .bind(target_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("result_history", e))?;

        rows.iter().map(from_row).collect()
    }

    async fn list(
        &self,
        filter: &ResultFilter,
        pagination: Pagination,
    ) -> Result<Page<StoredResult>, StoreError> {
        let f = BoundFilter::from(filter);

        let count_row = sqlx::query(&format!("SELECT COUNT(*) AS total FROM results WHERE {FILTER}"))
            .bind(f.kind)
            .bind(&f.target_id)
            .bind(&f.job_id)
            .bind(&f.q)
            .bind(&f.created_from)
            .bind(&f.created_to)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_results", e))?;

        let total: i64 = count_row
            .try_get("total")
            .map_err(|e| StoreError::Storage(format!("failed to read count: {e}")))?;

        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM results WHERE {FILTER} \
             ORDER BY created_at DESC, id DESC LIMIT ?7 OFFSET ?8"
        ))
        .bind(f.kind)
        .bind(&f.target_id)
        .bind(&f.job_id)
        .bind(&f.q)
        .bind(&f.created_from)
        .bind(&f.created_to)
        .bind(pagination.limit as i64)
        .bind(pagination.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_results", e))?;

        let items = rows.iter().map(from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total.max(0) as u64, pagination))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::InMemoryResultStore;
    use crate::sqlite::{IN_MEMORY, connect};

    async fn store() -> SqliteResultStore {
        SqliteResultStore::new(connect(IN_MEMORY).await.unwrap())
    }

    fn enriched(target: &str, job: JobId, original: &str, text: &str) -> NewResult {
        NewResult {
            target_id: target.to_string(),
            job_id: job,
            content: ResultContent::Enriched {
                original_description: original.to_string(),
                enriched_description: text.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn appended_records_read_back_unchanged() {
        let store = store().await;
        let job = JobId::new();

        let first = store
            .append(enriched("MLA1", job, "Zapatilla", "Calzado liviano"))
            .await
            .unwrap();
        let second = store
            .append(enriched("MLA1", job, "Zapatilla", "Calzado comodo"))
            .await
            .unwrap();

        assert!(second.id > first.id);
        assert_eq!(
            store.latest(JobKind::Enrichment, "MLA1").await.unwrap(),
            Some(second.clone())
        );
        assert_eq!(
            store.history(None, "MLA1").await.unwrap(),
            vec![second, first]
        );
    }

    #[tokio::test]
    async fn list_applies_filters_and_pagination() {
        let store = store().await;
        let job = JobId::new();
        for i in 0..5 {
            store
                .append(enriched(&format!("T{i}"), job, "Mochila", &format!("texto {i}")))
                .await
                .unwrap();
        }
        store
            .append(NewResult {
                target_id: "X".into(),
                job_id: JobId::new(),
                content: ResultContent::Extracted {
                    description: "Campera".into(),
                },
            })
            .await
            .unwrap();

        let page = store
            .list(
                &ResultFilter {
                    kind: Some(JobKind::Enrichment),
                    q: Some("mochila".into()),
                    ..Default::default()
                },
                Pagination::new(Some(2), Some(0)),
            )
            .await
            .unwrap();

        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.items[0].target_id, "T4");

        let by_job = store
            .list(
                &ResultFilter {
                    job_id: Some(job),
                    ..Default::default()
                },
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(by_job.total, 5);
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("a_b%c\\d"), "a\\_b\\%c\\\\d");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[tokio::test]
    async fn search_text_matches_literally_in_both_backends() {
        let sqlite_store = store().await;
        let memory = InMemoryResultStore::new();
        let job = JobId::new();

        let records = [
            ("A", "Mochila urbana", "Mochila con bolsillo_lateral"),
            ("B", "Remera 100% algodon", "Remera fresca"),
            ("C", "Taza", "Taza de ceramica"),
            ("D", "Ruta C:\\fotos", "Lampara"),
        ];
        for (target, original, text) in records {
            sqlite_store.append(enriched(target, job, original, text)).await.unwrap();
            memory.append(enriched(target, job, original, text)).await.unwrap();
        }

        for (q, expected) in [("_", vec!["A"]), ("%", vec!["B"]), ("\\", vec!["D"]), ("taza", vec!["C"])] {
            let filter = ResultFilter {
                q: Some(q.to_string()),
                ..Default::default()
            };
            let from_sqlite = sqlite_store.list(&filter, Pagination::default()).await.unwrap();
            let from_memory = memory.list(&filter, Pagination::default()).await.unwrap();

            let ids = |page: &Page<StoredResult>| {
                page.items.iter().map(|r| r.target_id.clone()).collect::<Vec<_>>()
            };
            assert_eq!(ids(&from_sqlite), expected, "sqlite q={q:?}");
            assert_eq!(ids(&from_memory), expected, "in-memory q={q:?}");
        }
    }
}

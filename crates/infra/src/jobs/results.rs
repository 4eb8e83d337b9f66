//! Append-only result store.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use itemflow_core::{JobId, JobKind};

use super::pagination::{Page, Pagination};

/// Surrogate id of a stored result. Auto-incrementing, never reused.
pub type RecordId = i64;

/// Storage error shared by the result store and the audit log.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate record: {0}")]
    Duplicate(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Artifact produced by a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultContent {
    Extracted {
        description: String,
    },
    Enriched {
        original_description: String,
        enriched_description: String,
    },
}

impl ResultContent {
    pub fn kind(&self) -> JobKind {
        match self {
            ResultContent::Extracted { .. } => JobKind::Extraction,
            ResultContent::Enriched { .. } => JobKind::Enrichment,
        }
    }

    /// Source text the record was derived from, if any.
    pub fn original(&self) -> Option<&str> {
        match self {
            ResultContent::Extracted { .. } => None,
            ResultContent::Enriched {
                original_description,
                ..
            } => Some(original_description),
        }
    }

    /// The produced text.
    pub fn text(&self) -> &str {
        match self {
            ResultContent::Extracted { description } => description,
            ResultContent::Enriched {
                enriched_description,
                ..
            } => enriched_description,
        }
    }

    fn mentions(&self, needle_lower: &str) -> bool {
        self.text().to_lowercase().contains(needle_lower)
            || self
                .original()
                .is_some_and(|o| o.to_lowercase().contains(needle_lower))
    }
}

/// A result about to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResult {
    pub target_id: String,
    pub job_id: JobId,
    pub content: ResultContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResult {
    pub id: RecordId,
    pub target_id: String,
    pub job_id: JobId,
    #[serde(flatten)]
    pub content: ResultContent,
    pub created_at: DateTime<Utc>,
}

/// Filter criteria for result listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultFilter {
    pub kind: Option<JobKind>,
    pub target_id: Option<String>,
    pub job_id: Option<JobId>,
    /// Case-insensitive substring over original and produced text.
    pub q: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

impl ResultFilter {
    pub fn kind(kind: JobKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &StoredResult) -> bool {
        self.kind.is_none_or(|k| record.content.kind() == k)
            && self
                .target_id
                .as_deref()
                .is_none_or(|t| record.target_id == t)
            && self.job_id.is_none_or(|j| record.job_id == j)
            && self
                .q
                .as_deref()
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .is_none_or(|q| record.content.mentions(&q.to_lowercase()))
            && self.created_from.is_none_or(|from| record.created_at >= from)
            && self.created_to.is_none_or(|to| record.created_at <= to)
    }
}

/// Append-only persistence of produced artifacts.
///
/// Records are never updated or deleted; listings are newest first.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn append(&self, record: NewResult) -> Result<StoredResult, StoreError>;

    /// Most recent record of `kind` for a target.
    async fn latest(
        &self,
        kind: JobKind,
        target_id: &str,
    ) -> Result<Option<StoredResult>, StoreError>;

    /// Every record for a target, newest first.
    async fn history(
        &self,
        kind: Option<JobKind>,
        target_id: &str,
    ) -> Result<Vec<StoredResult>, StoreError>;

    async fn list(
        &self,
        filter: &ResultFilter,
        pagination: Pagination,
    ) -> Result<Page<StoredResult>, StoreError>;
}

/// In-memory result store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    records: RwLock<Vec<StoredResult>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn newest_first(&self, filter: &ResultFilter) -> Result<Vec<StoredResult>, StoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;

        let mut matching: Vec<StoredResult> =
            records.iter().filter(|r| filter.matches(r)).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(matching)
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn append(&self, record: NewResult) -> Result<StoredResult, StoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;

        let stored = StoredResult {
            id: records.len() as RecordId + 1,
            target_id: record.target_id,
            job_id: record.job_id,
            content: record.content,
            created_at: Utc::now(),
        };
        records.push(stored.clone());
        Ok(stored)
    }

    async fn latest(
        &self,
        kind: JobKind,
        target_id: &str,
    ) -> Result<Option<StoredResult>, StoreError> {
        let filter = ResultFilter {
            kind: Some(kind),
            target_id: Some(target_id.to_string()),
            ..Default::default()
        };
        Ok(self.newest_first(&filter)?.into_iter().next())
    }

    async fn history(
        &self,
        kind: Option<JobKind>,
        target_id: &str,
    ) -> Result<Vec<StoredResult>, StoreError> {
        let filter = ResultFilter {
            kind,
            target_id: Some(target_id.to_string()),
            ..Default::default()
        };
        self.newest_first(&filter)
    }

    async fn list(
        &self,
        filter: &ResultFilter,
        pagination: Pagination,
    ) -> Result<Page<StoredResult>, StoreError> {
        Ok(pagination.apply(self.newest_first(filter)?))
    }
}

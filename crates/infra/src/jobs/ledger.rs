//! Idempotency ledger: caller-supplied deduplication key -> job id.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use itemflow_core::JobId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("idempotency key must not be blank")]
    BlankKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdempotencyEntry {
    pub key: String,
    pub job_id: JobId,
    pub created_at: DateTime<Utc>,
}

/// Result of [`IdempotencyLedger::reserve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub job_id: JobId,
    /// `true` for the one caller whose factory ran.
    pub created: bool,
}

/// In-memory ledger. Entries are never evicted.
#[derive(Debug, Default)]
pub struct IdempotencyLedger {
    entries: Mutex<HashMap<String, IdempotencyEntry>>,
}

impl IdempotencyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the job recorded under `key`, or create one with `factory`.
    ///
    /// The factory runs while the ledger lock is held, so concurrent callers
    /// with the same key observe exactly one `created == true`. A factory
    /// error leaves no mapping behind.
    pub fn reserve<F, E>(&self, key: &str, factory: F) -> Result<Reservation, E>
    where
        F: FnOnce() -> Result<JobId, E>,
        E: From<LedgerError>,
    {
        let key = key.trim();
        if key.is_empty() {
            return Err(LedgerError::BlankKey.into());
        }

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = entries.get(key) {
            return Ok(Reservation {
                job_id: existing.job_id,
                created: false,
            });
        }

        let job_id = factory()?;
        entries.insert(
            key.to_string(),
            IdempotencyEntry {
                key: key.to_string(),
                job_id,
                created_at: Utc::now(),
            },
        );

        Ok(Reservation {
            job_id,
            created: true,
        })
    }

    pub fn lookup(&self, key: &str) -> Option<IdempotencyEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key.trim()).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

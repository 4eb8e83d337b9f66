//! SQLite-backed result store and audit log.
//!
//! ## Storage format
//!
//! - Timestamps are RFC 3339 text with microsecond precision and a `Z`
//!   suffix, so lexical order equals chronological order.
//! - Job ids are stored as their hyphenated UUID text.
//! - The schema is created on connect (`CREATE TABLE IF NOT EXISTS`).
//!
//! ## Error mapping
//!
//! | SQLx error | StoreError |
//! |------------|------------|
//! | Database (unique violation) | `Duplicate` |
//! | anything else | `Storage` |

mod audit;
mod results;

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::jobs::StoreError;

pub use audit::SqliteAuditLog;
pub use results::SqliteResultStore;

/// Path value selecting a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        target_id TEXT NOT NULL,
        job_id TEXT NOT NULL,
        original_content TEXT,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_results_target_id ON results (target_id)",
    "CREATE INDEX IF NOT EXISTS idx_results_created_at ON results (created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS job_audits (
        job_id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        finished_at TEXT NOT NULL,
        duration_ms INTEGER NOT NULL,
        total_tasks INTEGER NOT NULL,
        succeeded INTEGER NOT NULL,
        failed INTEGER NOT NULL,
        retries INTEGER NOT NULL,
        detail TEXT
    )
    "#,
];

/// Open (or create) the database at `path` and ensure the schema exists.
///
/// `:memory:` gives a single-connection in-memory database that lives as long
/// as the pool.
pub async fn connect(path: &str) -> Result<SqlitePool, StoreError> {
    let pool = if path == IN_MEMORY {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| map_sqlx_error("connect", e))?;
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?
    } else {
        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Storage(format!("create {}: {e}", parent.display())))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?
    };

    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(&pool)
            .await
            .map_err(|e| map_sqlx_error("create_schema", e))?;
    }

    info!(path, "sqlite store ready");
    Ok(pool)
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            StoreError::Duplicate(format!("{operation}: {}", db_err.message()))
        }
        sqlx::Error::Database(db_err) => {
            StoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

/// Timestamps are kept at the precision the database stores.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(column: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Storage(format!("bad timestamp in {column}: {e}")))
}

fn decode<T>(column: &str, raw: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| StoreError::Storage(format!("bad value in {column}: {e}")))
}

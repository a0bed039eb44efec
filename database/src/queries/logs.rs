//! Append-only job log queries

use chrono::{DateTime, Duration, Utc};
use confpush_core::{Error, Result};
use sqlx::{Pool, Sqlite};
use tracing::instrument;

use crate::models::{JobLog, LogStage};

/// Log entry parameters
pub struct LogEntry<'a> {
    pub job_id: i64,
    pub attempt_id: Option<i64>,
    pub stage: LogStage,
    pub output: &'a str,
    pub exit_code: i32,
}

/// Append a log entry
///
/// `created_at` is strictly greater than that of every earlier entry of the
/// same job, so ordering by it reproduces insertion order even when the wall
/// clock stalls or steps back.
#[instrument(skip(pool, entry), fields(job_id = entry.job_id, stage = entry.stage.as_str()))]
pub async fn append_log(pool: &Pool<Sqlite>, entry: LogEntry<'_>) -> Result<i64> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

    let last: Option<DateTime<Utc>> = sqlx::query_scalar(
        r#"
        SELECT created_at
        FROM job_logs
        WHERE job_id = ?
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .bind(entry.job_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to read last log time: {}", e)))?;

    let now = Utc::now();
    let created_at = match last {
        Some(last) if now <= last => last + Duration::microseconds(1),
        _ => now,
    };

    let id = sqlx::query(
        r#"
        INSERT INTO job_logs (job_id, attempt_id, stage, output, exit_code, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.job_id)
    .bind(entry.attempt_id)
    .bind(entry.stage.as_str())
    .bind(entry.output)
    .bind(entry.exit_code)
    .bind(created_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to append log: {}", e)))?
    .last_insert_rowid();

    tx.commit()
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to commit log: {}", e)))?;

    Ok(id)
}

/// All log entries of a job in chronological order
pub async fn list_logs(pool: &Pool<Sqlite>, job_id: i64) -> Result<Vec<JobLog>> {
    sqlx::query_as::<_, JobLog>(
        r#"
        SELECT id, job_id, attempt_id, stage, output, exit_code, created_at
        FROM job_logs
        WHERE job_id = ?
        ORDER BY created_at, id
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to list logs: {}", e)))
}

/// Log entries written by one attempt
pub async fn list_attempt_logs(pool: &Pool<Sqlite>, attempt_id: i64) -> Result<Vec<JobLog>> {
    sqlx::query_as::<_, JobLog>(
        r#"
        SELECT id, job_id, attempt_id, stage, output, exit_code, created_at
        FROM job_logs
        WHERE attempt_id = ?
        ORDER BY created_at, id
        "#,
    )
    .bind(attempt_id)
    .fetch_all(pool)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to list attempt logs: {}", e)))
}

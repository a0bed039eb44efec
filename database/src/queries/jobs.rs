//! Job and attempt queries

use anyhow::Context;
use chrono::{DateTime, Utc};
use confpush_core::{Error, Result};
use sqlx::{Pool, Sqlite};
use tracing::{debug, instrument};

use crate::models::{Attempt, CreateJob, Job, JobStatus};

// ============================================================================
// Job Queries
// ============================================================================

/// List jobs, newest first
#[instrument(skip(pool))]
pub async fn list_jobs(pool: &Pool<Sqlite>, limit: i64, offset: i64) -> Result<Vec<Job>> {
    sqlx::query_as::<_, Job>(
        r#"
        SELECT id, name, device_id, command, status, created_at
        FROM jobs
        ORDER BY id DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("Failed to list jobs")
    .map_err(|e| Error::DatabaseError(format!("{:#}", e)))
}

/// Get job by ID
#[instrument(skip(pool))]
pub async fn find_job(pool: &Pool<Sqlite>, id: i64) -> Result<Option<Job>> {
    sqlx::query_as::<_, Job>(
        r#"
        SELECT id, name, device_id, command, status, created_at
        FROM jobs
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get job")
    .map_err(|e| Error::DatabaseError(format!("{:#}", e)))
}

/// Create a new job in PENDING state
#[instrument(skip(pool, job), fields(device_id = job.device_id))]
pub async fn create_job(pool: &Pool<Sqlite>, job: &CreateJob) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO jobs (name, device_id, command, status, created_at)
        VALUES (?, ?, ?, 'PENDING', ?)
        "#,
    )
    .bind(&job.name)
    .bind(job.device_id)
    .bind(&job.command)
    .bind(Utc::now())
    .execute(pool)
    .await
    .context("Failed to create job")
    .map_err(|e| Error::DatabaseError(format!("{:#}", e)))?;

    Ok(result.last_insert_rowid())
}

/// Overwrite a job's status
#[instrument(skip(pool))]
pub async fn set_job_status(pool: &Pool<Sqlite>, id: i64, status: JobStatus) -> Result<()> {
    sqlx::query("UPDATE jobs SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update job status")
        .map_err(|e| Error::DatabaseError(format!("{:#}", e)))?;

    Ok(())
}

// ============================================================================
// Admission
// ============================================================================

/// Attempt created by a successful admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmittedAttempt {
    pub attempt_id: i64,
    pub attempt_no: i64,
}

/// Atomically move a job to RUNNING and open its next attempt
///
/// The status transition is a single conditional write, so of two concurrent
/// callers exactly one succeeds and the other gets [`Error::AlreadyRunning`].
/// The attempt number is the count of prior attempts plus one.
#[instrument(skip(pool))]
pub async fn admit_job(pool: &Pool<Sqlite>, job_id: i64) -> Result<AdmittedAttempt> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to begin admission: {}", e)))?;

    let updated = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'RUNNING'
        WHERE id = ? AND status <> 'RUNNING'
        "#,
    )
    .bind(job_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to transition job: {}", e)))?
    .rows_affected();

    if updated == 0 {
        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to look up job: {}", e)))?;

        return Err(if exists == 0 {
            Error::NotFound(format!("job {}", job_id))
        } else {
            Error::AlreadyRunning(job_id)
        });
    }

    let prior: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_attempts WHERE job_id = ?")
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to count attempts: {}", e)))?;
    let attempt_no = prior + 1;

    let attempt_id = sqlx::query(
        r#"
        INSERT INTO job_attempts (job_id, attempt_no, created_at)
        VALUES (?, ?, ?)
        "#,
    )
    .bind(job_id)
    .bind(attempt_no)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to create attempt: {}", e)))?
    .last_insert_rowid();

    tx.commit()
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to commit admission: {}", e)))?;

    debug!(job_id, attempt_id, attempt_no, "Job admitted");
    Ok(AdmittedAttempt {
        attempt_id,
        attempt_no,
    })
}

// ============================================================================
// Attempt Queries
// ============================================================================

/// Get attempt by ID
#[instrument(skip(pool))]
pub async fn find_attempt(pool: &Pool<Sqlite>, id: i64) -> Result<Option<Attempt>> {
    sqlx::query_as::<_, Attempt>(
        r#"
        SELECT id, job_id, attempt_no, created_at, started_at, completed_at, exit_code
        FROM job_attempts
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get attempt")
    .map_err(|e| Error::DatabaseError(format!("{:#}", e)))
}

/// All attempts of a job in attempt-number order
#[instrument(skip(pool))]
pub async fn list_attempts(pool: &Pool<Sqlite>, job_id: i64) -> Result<Vec<Attempt>> {
    sqlx::query_as::<_, Attempt>(
        r#"
        SELECT id, job_id, attempt_no, created_at, started_at, completed_at, exit_code
        FROM job_attempts
        WHERE job_id = ?
        ORDER BY attempt_no
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await
    .context("Failed to list attempts")
    .map_err(|e| Error::DatabaseError(format!("{:#}", e)))
}

/// Attempts with no completion time, oldest first
pub async fn list_open_attempts(pool: &Pool<Sqlite>) -> Result<Vec<Attempt>> {
    sqlx::query_as::<_, Attempt>(
        r#"
        SELECT id, job_id, attempt_no, created_at, started_at, completed_at, exit_code
        FROM job_attempts
        WHERE completed_at IS NULL
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await
    .context("Failed to list open attempts")
    .map_err(|e| Error::DatabaseError(format!("{:#}", e)))
}

/// Open attempts whose start (or creation, if never started) is before `cutoff`
pub async fn list_stale_attempts(
    pool: &Pool<Sqlite>,
    cutoff: DateTime<Utc>,
) -> Result<Vec<Attempt>> {
    // Filtered here rather than in SQL: stored timestamps carry variable precision
    let open = list_open_attempts(pool).await?;
    Ok(open
        .into_iter()
        .filter(|a| a.started_at.unwrap_or(a.created_at) < cutoff)
        .collect())
}

/// Job goes RUNNING and the attempt records its start, in one commit
///
/// Returns `false` and changes nothing when the attempt is already closed.
#[instrument(skip(pool))]
pub async fn mark_attempt_started(
    pool: &Pool<Sqlite>,
    job_id: i64,
    attempt_id: i64,
    started_at: DateTime<Utc>,
) -> Result<bool> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

    let started = sqlx::query(
        r#"
        UPDATE job_attempts
        SET started_at = ?
        WHERE id = ? AND job_id = ? AND completed_at IS NULL
        "#,
    )
    .bind(started_at)
    .bind(attempt_id)
    .bind(job_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to mark attempt started: {}", e)))?
    .rows_affected();

    if started == 0 {
        tx.rollback()
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to roll back: {}", e)))?;
        return Ok(false);
    }

    sqlx::query("UPDATE jobs SET status = 'RUNNING' WHERE id = ?")
        .bind(job_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to mark job running: {}", e)))?;

    tx.commit()
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to commit transaction: {}", e)))?;

    Ok(true)
}

/// Close the attempt and set the job's final status, in one commit
///
/// Returns `false` when the attempt was already closed; the job status is
/// then left alone, since it belongs to whoever closed the attempt.
#[instrument(skip(pool))]
pub async fn finish_attempt(
    pool: &Pool<Sqlite>,
    job_id: i64,
    attempt_id: i64,
    status: JobStatus,
    exit_code: i32,
) -> Result<bool> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

    let closed = sqlx::query(
        r#"
        UPDATE job_attempts
        SET completed_at = ?, exit_code = ?
        WHERE id = ? AND job_id = ? AND completed_at IS NULL
        "#,
    )
    .bind(Utc::now())
    .bind(exit_code)
    .bind(attempt_id)
    .bind(job_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to close attempt: {}", e)))?
    .rows_affected();

    if closed == 0 {
        tx.rollback()
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to roll back: {}", e)))?;
        return Ok(false);
    }

    sqlx::query("UPDATE jobs SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(job_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to update job status: {}", e)))?;

    tx.commit()
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to commit transaction: {}", e)))?;

    Ok(true)
}

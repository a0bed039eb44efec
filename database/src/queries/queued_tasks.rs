//! Durable task queue backed by the `queued_tasks` table

use chrono::Utc;
use confpush_core::{DeployTask, Error, Result};
use sqlx::{Pool, Sqlite};
use tracing::instrument;

use crate::models::{QueuedTask, TaskState};

/// Persist a task in `queued` state
#[instrument(skip(pool, task), fields(job_id = task.job_id, attempt_id = task.attempt_id))]
pub async fn enqueue_task(pool: &Pool<Sqlite>, task: &DeployTask) -> Result<i64> {
    let payload = serde_json::to_string(task)?;

    let result = sqlx::query(
        r#"
        INSERT INTO queued_tasks (job_id, attempt_id, payload, state, enqueued_at)
        VALUES (?, ?, ?, 'queued', ?)
        "#,
    )
    .bind(task.job_id)
    .bind(task.attempt_id)
    .bind(payload)
    .bind(Utc::now())
    .execute(pool)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to enqueue task: {}", e)))?;

    Ok(result.last_insert_rowid())
}

/// Claim the oldest queued task
///
/// One conditional UPDATE ... RETURNING, so a task is handed to at most one
/// caller.
pub async fn claim_next_task(pool: &Pool<Sqlite>) -> Result<Option<QueuedTask>> {
    sqlx::query_as::<_, QueuedTask>(
        r#"
        UPDATE queued_tasks
        SET state = 'claimed', claimed_at = ?
        WHERE id = (
            SELECT id FROM queued_tasks
            WHERE state = 'queued'
            ORDER BY id
            LIMIT 1
        )
        AND state = 'queued'
        RETURNING id, job_id, attempt_id, payload, state, enqueued_at, claimed_at,
                  finished_at, outcome
        "#,
    )
    .bind(Utc::now())
    .fetch_optional(pool)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to claim task: {}", e)))
}

/// Record the terminal state of a claimed task
pub async fn finish_task(
    pool: &Pool<Sqlite>,
    id: i64,
    state: TaskState,
    outcome: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE queued_tasks
        SET state = ?, finished_at = ?, outcome = ?
        WHERE id = ?
        "#,
    )
    .bind(state.as_str())
    .bind(Utc::now())
    .bind(outcome)
    .bind(id)
    .execute(pool)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to finish task: {}", e)))?;

    Ok(())
}

/// Mark every unfinished task of an attempt as timed out
pub async fn expire_attempt_tasks(pool: &Pool<Sqlite>, attempt_id: i64) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE queued_tasks
        SET state = 'timed_out', finished_at = ?
        WHERE attempt_id = ? AND state IN ('queued', 'claimed')
        "#,
    )
    .bind(Utc::now())
    .bind(attempt_id)
    .execute(pool)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to expire tasks: {}", e)))?;

    Ok(result.rows_affected())
}

/// Get queued task by ID
pub async fn get_task(pool: &Pool<Sqlite>, id: i64) -> Result<Option<QueuedTask>> {
    sqlx::query_as::<_, QueuedTask>(
        r#"
        SELECT id, job_id, attempt_id, payload, state, enqueued_at, claimed_at,
               finished_at, outcome
        FROM queued_tasks
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to get task: {}", e)))
}

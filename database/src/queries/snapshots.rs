use chrono::Utc;
use confpush_core::{Error, Result};
use sqlx::{Pool, Sqlite};

use crate::models::{ConfigSnapshot, NewSnapshot};

/// Record a snapshot taken by the snapshot store
pub async fn create_snapshot(pool: &Pool<Sqlite>, snapshot: NewSnapshot<'_>) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO config_snapshots (device_id, attempt_id, filename, content, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(snapshot.device_id)
    .bind(snapshot.attempt_id)
    .bind(snapshot.filename)
    .bind(snapshot.content)
    .bind(Utc::now())
    .execute(pool)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to record snapshot: {}", e)))?;

    Ok(result.last_insert_rowid())
}

/// Most recent snapshot of a device
pub async fn latest_snapshot_for_device(
    pool: &Pool<Sqlite>,
    device_id: i64,
) -> Result<Option<ConfigSnapshot>> {
    sqlx::query_as::<_, ConfigSnapshot>(
        r#"
        SELECT id, device_id, attempt_id, filename, content, created_at
        FROM config_snapshots
        WHERE device_id = ?
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .bind(device_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to get latest snapshot: {}", e)))
}

/// Snapshots of a device, newest first
pub async fn list_snapshots_for_device(
    pool: &Pool<Sqlite>,
    device_id: i64,
) -> Result<Vec<ConfigSnapshot>> {
    sqlx::query_as::<_, ConfigSnapshot>(
        r#"
        SELECT id, device_id, attempt_id, filename, content, created_at
        FROM config_snapshots
        WHERE device_id = ?
        ORDER BY id DESC
        "#,
    )
    .bind(device_id)
    .fetch_all(pool)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to list snapshots: {}", e)))
}

/// Snapshot taken by a given attempt
pub async fn find_snapshot_for_attempt(
    pool: &Pool<Sqlite>,
    attempt_id: i64,
) -> Result<Option<ConfigSnapshot>> {
    sqlx::query_as::<_, ConfigSnapshot>(
        r#"
        SELECT id, device_id, attempt_id, filename, content, created_at
        FROM config_snapshots
        WHERE attempt_id = ?
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .bind(attempt_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to get attempt snapshot: {}", e)))
}

use chrono::Utc;
use confpush_core::{Error, Result};
use sqlx::{Pool, Sqlite};
use tracing::debug;

use crate::models::{AuditEvent, AuditRecord};

/// Record an audit event at a mutating operation's boundary
pub async fn record_audit_event(pool: &Pool<Sqlite>, record: AuditRecord<'_>) -> Result<i64> {
    let details = record
        .details
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let result = sqlx::query(
        r#"
        INSERT INTO audit_events (actor, action, target, details, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.actor)
    .bind(record.action)
    .bind(record.target)
    .bind(details)
    .bind(Utc::now())
    .execute(pool)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to record audit event: {}", e)))?;

    debug!(actor = record.actor, action = record.action, "Audit event recorded");
    Ok(result.last_insert_rowid())
}

/// Most recent audit events
pub async fn list_audit_events(pool: &Pool<Sqlite>, limit: i64) -> Result<Vec<AuditEvent>> {
    sqlx::query_as::<_, AuditEvent>(
        r#"
        SELECT id, actor, action, target, details, created_at
        FROM audit_events
        ORDER BY id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to list audit events: {}", e)))
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// ConfigSnapshot model - metadata of a pre-change configuration capture
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ConfigSnapshot {
    pub id: i64,
    pub device_id: i64,
    /// Attempt that took the capture
    pub attempt_id: Option<i64>,
    /// Absolute path of the snapshot file
    pub filename: String,
    /// Inlined copy of the file, when enabled
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for recording a snapshot
#[derive(Debug, Clone)]
pub struct NewSnapshot<'a> {
    pub device_id: i64,
    pub attempt_id: Option<i64>,
    pub filename: &'a str,
    pub content: Option<&'a str>,
}

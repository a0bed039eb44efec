use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;

/// AuditEvent model - who did what to which object
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEvent {
    pub id: i64,
    pub actor: String,
    pub action: String,
    pub target: Option<String>,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Get details as JSON value
    pub fn get_details(&self) -> JsonValue {
        self.details
            .as_ref()
            .and_then(|d| serde_json::from_str(d).ok())
            .unwrap_or(JsonValue::Object(serde_json::Map::new()))
    }
}

/// Audit record parameters
pub struct AuditRecord<'a> {
    pub actor: &'a str,
    pub action: &'a str,
    pub target: Option<&'a str>,
    pub details: Option<JsonValue>,
}

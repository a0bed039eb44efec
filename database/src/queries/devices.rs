use chrono::Utc;
use confpush_core::{Error, Result};
use sqlx::{Pool, Sqlite};
use tracing::instrument;

use crate::models::{CreateDevice, Device};

/// List all devices
pub async fn list_devices(pool: &Pool<Sqlite>) -> Result<Vec<Device>> {
    sqlx::query_as::<_, Device>(
        r#"
        SELECT id, name, ip, platform, port, credentials_ref, created_at
        FROM devices
        ORDER BY name
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to list devices: {}", e)))
}

/// Get device by ID
pub async fn find_device(pool: &Pool<Sqlite>, id: i64) -> Result<Option<Device>> {
    sqlx::query_as::<_, Device>(
        r#"
        SELECT id, name, ip, platform, port, credentials_ref, created_at
        FROM devices
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to get device: {}", e)))
}

/// Get device by name
pub async fn find_device_by_name(pool: &Pool<Sqlite>, name: &str) -> Result<Option<Device>> {
    sqlx::query_as::<_, Device>(
        r#"
        SELECT id, name, ip, platform, port, credentials_ref, created_at
        FROM devices
        WHERE name = ?
        "#,
    )
    .bind(name)
    .fetch_optional(pool)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to get device by name: {}", e)))
}

/// Create a new device
#[instrument(skip(pool, device), fields(name = %device.name))]
pub async fn create_device(pool: &Pool<Sqlite>, device: &CreateDevice) -> Result<i64> {
    device.validate()?;

    let result = sqlx::query(
        r#"
        INSERT INTO devices (name, ip, platform, port, credentials_ref, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&device.name)
    .bind(&device.ip)
    .bind(device.platform.as_str())
    .bind(i64::from(device.port))
    .bind(&device.credentials_ref)
    .bind(Utc::now())
    .execute(pool)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to create device: {}", e)))?;

    Ok(result.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use confpush_core::PlatformKind;

    fn input(name: &str, credentials_ref: &str) -> CreateDevice {
        CreateDevice {
            name: name.to_string(),
            ip: "192.0.2.10".to_string(),
            platform: PlatformKind::CiscoIos,
            port: 22,
            credentials_ref: credentials_ref.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_find_device() {
        let db = Database::in_memory().await.unwrap();
        let id = create_device(db.pool(), &input("edge-1", "devices/edge-1"))
            .await
            .unwrap();

        let device = find_device(db.pool(), id).await.unwrap().unwrap();
        assert_eq!(device.name, "edge-1");
        assert_eq!(device.platform(), Some(PlatformKind::CiscoIos));
        assert_eq!(device.credentials_ref, "devices/edge-1");

        let by_name = find_device_by_name(db.pool(), "edge-1").await.unwrap();
        assert_eq!(by_name.map(|d| d.id), Some(id));
        assert!(find_device(db.pool(), id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_credentials_ref_rejected() {
        let db = Database::in_memory().await.unwrap();
        let err = create_device(db.pool(), &input("edge-2", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
        assert!(list_devices(db.pool()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let db = Database::in_memory().await.unwrap();
        create_device(db.pool(), &input("edge-3", "a")).await.unwrap();
        let err = create_device(db.pool(), &input("edge-3", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DatabaseError(_)));
    }
}

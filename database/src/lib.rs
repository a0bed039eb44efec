//! Database layer with SQLite

use chrono::Utc;
use confpush_core::{Error, Result};
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{sqlite::SqlitePool, Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

// Export models and queries
pub mod models;
pub mod queries;

pub use models::*;

// Re-export sqlx types for convenience
pub use sqlx::{self, Pool as SqlxPool, Sqlite as SqlxSqlite};

// Embed migrations at compile time
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Database connection pool
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Create a new database connection
    pub async fn new(database_url: &str) -> Result<Self> {
        info!(url = %database_url, "Connecting to database");

        // Ensure the parent directory of a file-backed database exists
        if let Some(path) = database_url.strip_prefix("sqlite:") {
            let path = path.trim_start_matches("//");
            if !path.starts_with(":memory:") {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        info!(dir = ?parent, "Creating database directory");
                        std::fs::create_dir_all(parent).map_err(|e| {
                            Error::DatabaseError(format!(
                                "Failed to create database directory: {}",
                                e
                            ))
                        })?;
                    }
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| Error::DatabaseError(format!("Invalid database URL: {}", e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to connect: {}", e)))?;

        Ok(Self { pool })
    }

    /// Migrated database living on a single in-memory connection
    ///
    /// Used by tests; every handle shares the one connection, so the schema
    /// and rows survive for as long as the `Database` does.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::DatabaseError(format!("Invalid database URL: {}", e)))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to connect: {}", e)))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations");

        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to run migrations: {}", e)))?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Close the database connection
    pub async fn close(self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

// ============================================================================
// Helper functions for common database operations
// ============================================================================

/// Metric row as stored
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct MetricSample {
    pub id: i64,
    pub metric_name: String,
    pub metric_value: f64,
    pub metric_unit: Option<String>,
    pub labels: Option<String>,
    pub recorded_at: chrono::DateTime<Utc>,
}

/// Record a metric
pub async fn record_metric(
    pool: &Pool<Sqlite>,
    metric_name: &str,
    metric_value: f64,
    metric_unit: Option<&str>,
    labels: Option<&JsonValue>,
) -> Result<()> {
    let labels = labels.map(serde_json::to_string).transpose()?;

    sqlx::query(
        r#"
        INSERT INTO metrics (metric_name, metric_value, metric_unit, labels, recorded_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(metric_name)
    .bind(metric_value)
    .bind(metric_unit)
    .bind(labels)
    .bind(Utc::now())
    .execute(pool)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to record metric: {}", e)))?;

    Ok(())
}

/// Samples of one metric, oldest first
pub async fn list_metrics(pool: &Pool<Sqlite>, metric_name: &str) -> Result<Vec<MetricSample>> {
    sqlx::query_as::<_, MetricSample>(
        r#"
        SELECT id, metric_name, metric_value, metric_unit, labels, recorded_at
        FROM metrics
        WHERE metric_name = ?
        ORDER BY id
        "#,
    )
    .bind(metric_name)
    .fetch_all(pool)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to list metrics: {}", e)))
}

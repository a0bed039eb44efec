//! Application state

use std::sync::Arc;

use confpush_core::{Result, Settings};
use confpush_database::Database;
use tracing::info;

/// Settings plus a migrated database, shared by both binaries
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub database: Database,
}

impl AppState {
    /// Connect to the configured database and bring its schema up to date
    pub async fn new(settings: Settings) -> Result<Self> {
        let database = Database::new(&settings.database_url).await?;
        database.migrate().await?;
        info!(snapshot_dir = %settings.snapshot_dir.display(), "Application state ready");

        Ok(Self {
            settings: Arc::new(settings),
            database,
        })
    }

    /// Wrap an already migrated database
    pub fn with_database(settings: Settings, database: Database) -> Self {
        Self {
            settings: Arc::new(settings),
            database,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_migrates_database() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            database_url: format!("sqlite:{}", dir.path().join("state.db").display()),
            snapshot_dir: dir.path().join("snapshots"),
            ..Settings::default()
        };

        let state = AppState::new(settings).await.unwrap();
        let devices = confpush_database::queries::list_devices(state.database.pool())
            .await
            .unwrap();
        assert!(devices.is_empty());
    }
}

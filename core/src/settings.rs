//! Configuration management
//!
//! Settings are built once at startup and shared read-only (`Arc<Settings>`)
//! with the engine, the secrets resolver and the worker pool.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Database URL
    pub database_url: String,

    /// Directory holding configuration snapshots
    pub snapshot_dir: PathBuf,

    /// Also store snapshot content in the database row
    pub inline_snapshot_content: bool,

    /// Secrets backend base URL (env fallback when unset)
    pub vault_url: Option<String>,

    /// Secrets backend token
    pub vault_token: Option<String>,

    pub vault_timeout_secs: u64,

    /// Bound on every device session open and command round-trip
    pub session_timeout_secs: u64,

    /// Worker pool size
    pub workers: usize,

    /// Runs longer than this are logged as slow
    pub task_soft_timeout_secs: u64,

    /// Runs longer than this are abandoned and left for reconciliation
    pub task_hard_timeout_secs: u64,

    pub poll_interval_ms: u64,

    pub reconcile_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite:data/confpush.db".to_string(),
            snapshot_dir: PathBuf::from("data/snapshots"),
            inline_snapshot_content: true,
            vault_url: None,
            vault_token: None,
            vault_timeout_secs: 5,
            session_timeout_secs: 60,
            workers: 4,
            task_soft_timeout_secs: 300,
            task_hard_timeout_secs: 600,
            poll_interval_ms: 500,
            reconcile_interval_secs: 60,
        }
    }
}

impl Settings {
    /// Load settings from file or environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let settings = if let Some(p) = path {
            Self::load_from_file(p)?
        } else {
            Self::load_from_env()?
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Load from configuration file
    fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse settings from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// Load from environment variables
    fn load_from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            snapshot_dir: std::env::var("SNAPSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.snapshot_dir),
            inline_snapshot_content: env_parse("INLINE_SNAPSHOT_CONTENT")?
                .unwrap_or(defaults.inline_snapshot_content),
            vault_url: get_secret("VAULT_URL").filter(|v| !v.is_empty()),
            vault_token: get_secret("VAULT_TOKEN").filter(|v| !v.is_empty()),
            vault_timeout_secs: env_parse("VAULT_TIMEOUT_SECS")?
                .unwrap_or(defaults.vault_timeout_secs),
            session_timeout_secs: env_parse("SESSION_TIMEOUT_SECS")?
                .unwrap_or(defaults.session_timeout_secs),
            workers: env_parse("WORKERS")?.unwrap_or(defaults.workers),
            task_soft_timeout_secs: env_parse("TASK_SOFT_TIMEOUT_SECS")?
                .unwrap_or(defaults.task_soft_timeout_secs),
            task_hard_timeout_secs: env_parse("TASK_HARD_TIMEOUT_SECS")?
                .unwrap_or(defaults.task_hard_timeout_secs),
            poll_interval_ms: env_parse("POLL_INTERVAL_MS")?.unwrap_or(defaults.poll_interval_ms),
            reconcile_interval_secs: env_parse("RECONCILE_INTERVAL_SECS")?
                .unwrap_or(defaults.reconcile_interval_secs),
        })
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::ConfigError("workers must be at least 1".into()));
        }
        if self.task_hard_timeout_secs < self.task_soft_timeout_secs {
            return Err(Error::ConfigError(
                "task_hard_timeout_secs must not be below task_soft_timeout_secs".into(),
            ));
        }
        if self.vault_url.is_some() != self.vault_token.is_some() {
            tracing::warn!("Only one of vault_url/vault_token is set; using environment secrets");
        }
        Ok(())
    }

    /// Backend URL and token, when both are configured
    pub fn vault(&self) -> Option<(&str, &str)> {
        match (self.vault_url.as_deref(), self.vault_token.as_deref()) {
            (Some(url), Some(token)) => Some((url, token)),
            _ => None,
        }
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn vault_timeout(&self) -> Duration {
        Duration::from_secs(self.vault_timeout_secs)
    }

    pub fn task_soft_timeout(&self) -> Duration {
        Duration::from_secs(self.task_soft_timeout_secs)
    }

    pub fn task_hard_timeout(&self) -> Duration {
        Duration::from_secs(self.task_hard_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

fn env_parse<T: std::str::FromStr>(var_name: &str) -> Result<Option<T>> {
    match std::env::var(var_name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::ConfigError(format!("Invalid value for {}: {}", var_name, value))),
        Err(_) => Ok(None),
    }
}

/// Get secret from environment variable or file
///
/// If `VAR_NAME` is not set, tries `VAR_NAME_FILE` which should point to a
/// file containing the secret (Docker/Kubernetes secrets).
pub fn get_secret(var_name: &str) -> Option<String> {
    if let Ok(value) = std::env::var(var_name) {
        return Some(value);
    }

    let file_var = format!("{}_FILE", var_name);
    if let Ok(path) = std::env::var(&file_var) {
        if let Ok(contents) = std::fs::read_to_string(&path) {
            return Some(contents.trim().to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_toml_overrides_defaults() {
        let settings = Settings::from_toml(
            r#"
            database_url = "sqlite::memory:"
            snapshot_dir = "/var/lib/confpush/snapshots"
            vault_url = "https://vault.internal:8200"
            vault_token = "s.abc"
            workers = 8
            "#,
        )
        .unwrap();

        assert_eq!(settings.database_url, "sqlite::memory:");
        assert_eq!(settings.workers, 8);
        assert_eq!(settings.session_timeout_secs, 60);
        assert_eq!(settings.vault(), Some(("https://vault.internal:8200", "s.abc")));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_vault_requires_url_and_token() {
        let settings = Settings {
            vault_url: Some("https://vault.internal:8200".into()),
            ..Settings::default()
        };
        assert_eq!(settings.vault(), None);
    }

    #[test]
    fn test_validate_rejects_inverted_timeouts() {
        let settings = Settings {
            task_soft_timeout_secs: 900,
            task_hard_timeout_secs: 600,
            ..Settings::default()
        };
        assert!(matches!(settings.validate(), Err(Error::ConfigError(_))));

        let settings = Settings {
            workers: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_get_secret_reads_file_fallback() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  token-from-file  ").unwrap();

        std::env::set_var(
            "CONFPUSH_TEST_TOKEN_FILE",
            file.path().to_str().unwrap(),
        );
        assert_eq!(
            get_secret("CONFPUSH_TEST_TOKEN"),
            Some("token-from-file".to_string())
        );
        assert_eq!(get_secret("CONFPUSH_TEST_TOKEN_MISSING"), None);
    }
}

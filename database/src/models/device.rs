use chrono::{DateTime, Utc};
use confpush_core::{DeviceTarget, Error, PlatformKind, Result};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Device model - a network device configuration is pushed to
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Device {
    pub id: i64,
    pub name: String,
    /// IP address or hostname
    pub ip: String,
    #[sqlx(rename = "platform")]
    pub platform_str: String,
    pub port: i64,
    /// Opaque secrets reference, never the credential itself
    pub credentials_ref: String,
    pub created_at: DateTime<Utc>,
}

impl Device {
    /// Get platform as enum
    pub fn platform(&self) -> Option<PlatformKind> {
        PlatformKind::from_str(&self.platform_str)
    }

    /// Connection details for a device session
    pub fn target(&self) -> Result<DeviceTarget> {
        let platform = self.platform().ok_or_else(|| {
            Error::ConfigError(format!(
                "device {} has unknown platform {}",
                self.id, self.platform_str
            ))
        })?;
        let port = u16::try_from(self.port).map_err(|_| {
            Error::ConfigError(format!("device {} has invalid port {}", self.id, self.port))
        })?;

        Ok(DeviceTarget {
            id: self.id,
            name: self.name.clone(),
            host: self.ip.clone(),
            port,
            platform,
        })
    }
}

/// Input for creating a new device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDevice {
    pub name: String,
    pub ip: String,
    pub platform: PlatformKind,
    #[serde(default = "default_port")]
    pub port: u16,
    pub credentials_ref: String,
}

fn default_port() -> u16 {
    22
}

impl CreateDevice {
    /// Check invariants before insert
    pub fn validate(&self) -> Result<()> {
        if self.credentials_ref.trim().is_empty() {
            return Err(Error::ConfigError(
                "credentials_ref must not be empty".to_string(),
            ));
        }
        if self.ip.trim().is_empty() {
            return Err(Error::ConfigError("ip must not be empty".to_string()));
        }
        Ok(())
    }
}

//! Shared types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, ErrorKind, Result};

/// Device platform family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    Generic,
    CiscoIos,
    JuniperJunos,
}

impl PlatformKind {
    /// Parse platform from string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "generic" => Some(Self::Generic),
            "cisco_ios" | "cisco" => Some(Self::CiscoIos),
            "juniper_junos" | "juniper" => Some(Self::JuniperJunos),
            _ => None,
        }
    }

    /// Convert platform to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::CiscoIos => "cisco_ios",
            Self::JuniperJunos => "juniper_junos",
        }
    }

    /// Command that prints the full running configuration
    pub fn show_config_command(&self) -> &'static str {
        match self {
            Self::CiscoIos => "show running-config",
            Self::Generic | Self::JuniperJunos => "show configuration",
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a session needs to reach one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTarget {
    pub id: i64,
    pub name: String,
    /// IP address or hostname
    pub host: String,
    pub port: u16,
    pub platform: PlatformKind,
}

impl DeviceTarget {
    /// Get display string for device
    pub fn display(&self) -> String {
        if self.port != 22 {
            format!("{} ({}:{})", self.name, self.host, self.port)
        } else {
            format!("{} ({})", self.name, self.host)
        }
    }
}

/// Materialized login fields for one device
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
    /// Privileged-mode secret for platforms that have one
    pub enable: Option<String>,
    pub private_key_path: Option<String>,
}

impl Credentials {
    /// Build credentials from a secret leaf map
    pub fn from_map(map: &serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        let field = |name: &str| {
            map.get(name)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .filter(|v| !v.is_empty())
        };

        let username = field("username")
            .ok_or_else(|| Error::SecretError("secret has no username field".to_string()))?;

        Ok(Self {
            username,
            password: field("password"),
            enable: field("enable"),
            private_key_path: field("private_key_path"),
        })
    }

    /// Parse the `username:password[:enable]` shorthand
    pub fn from_colon_form(value: &str) -> Result<Self> {
        let mut parts = value.splitn(3, ':');
        let username = parts.next().unwrap_or_default().trim();
        if username.is_empty() {
            return Err(Error::SecretError(
                "credential value has no username".to_string(),
            ));
        }

        let non_empty = |p: Option<&str>| p.map(str::to_string).filter(|p| !p.is_empty());
        Ok(Self {
            username: username.to_string(),
            password: non_empty(parts.next()),
            enable: non_empty(parts.next()),
            private_key_path: None,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("enable", &self.enable.as_ref().map(|_| "***"))
            .field("private_key_path", &self.private_key_path)
            .finish()
    }
}

/// Result of one exchange with a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub exit_code: i32,
    pub output: String,
}

impl CommandResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            output: output.into(),
        }
    }

    pub fn failed(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One queued unit of work: a (job, attempt) pair and its payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployTask {
    pub job_id: i64,
    pub attempt_id: i64,
    pub config_lines: Vec<String>,
    #[serde(default)]
    pub verify_commands: Vec<String>,
}

/// Final status of one engine run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Missing,
    Failed,
    Success,
}

/// Why an engine run did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    JobOrAttemptNotFound,
    DeviceNotFound,
    SecretFetchFailed,
    SnapshotFailed,
    NoConfigLines,
    ApplyFailed,
    VerifyFailed,
    InternalError,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JobOrAttemptNotFound => "job_or_attempt_not_found",
            Self::DeviceNotFound => "device_not_found",
            Self::SecretFetchFailed => "secret_fetch_failed",
            Self::SnapshotFailed => "snapshot_failed",
            Self::NoConfigLines => "no_config_lines",
            Self::ApplyFailed => "apply_failed",
            Self::VerifyFailed => "verify_failed",
            Self::InternalError => "internal_error",
        }
    }

    /// Taxonomy bucket for this reason
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::JobOrAttemptNotFound | Self::DeviceNotFound => ErrorKind::NotFound,
            Self::SecretFetchFailed | Self::NoConfigLines => ErrorKind::ConfigError,
            Self::SnapshotFailed | Self::ApplyFailed => ErrorKind::DeviceError,
            Self::VerifyFailed => ErrorKind::VerifyFailure,
            Self::InternalError => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one engine run produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub job_id: i64,
    pub attempt_id: i64,
    pub status: OutcomeStatus,
    pub reason: Option<FailureReason>,
    /// Path of the snapshot taken for this attempt, if any
    pub snapshot_path: Option<String>,
    /// Set when a rollback was needed and did not succeed
    pub device_dirty: bool,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn success(job_id: i64, attempt_id: i64, snapshot_path: Option<String>) -> Self {
        Self {
            job_id,
            attempt_id,
            status: OutcomeStatus::Success,
            reason: None,
            snapshot_path,
            device_dirty: false,
            error: None,
        }
    }

    pub fn failed(job_id: i64, attempt_id: i64, reason: FailureReason) -> Self {
        Self {
            job_id,
            attempt_id,
            status: if reason == FailureReason::JobOrAttemptNotFound {
                OutcomeStatus::Missing
            } else {
                OutcomeStatus::Failed
            },
            reason: Some(reason),
            snapshot_path: None,
            device_dirty: false,
            error: None,
        }
    }

    pub fn with_snapshot(mut self, path: impl Into<String>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

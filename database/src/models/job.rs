use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Job status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    /// Parse status from string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "RUNNING" => Some(Self::Running),
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Convert status to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    /// Check if status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job model - one requested configuration change for one device
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    pub id: i64,
    pub name: String,
    pub device_id: i64,
    pub command: String,
    #[sqlx(rename = "status")]
    pub status_str: String,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Get status as enum
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::from_str(&self.status_str)
    }

    pub fn is_running(&self) -> bool {
        self.status() == Some(JobStatus::Running)
    }
}

/// Input for creating a new job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJob {
    pub name: String,
    pub device_id: i64,
    pub command: String,
}

/// Attempt model - one concrete execution of a job's pipeline
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Attempt {
    pub id: i64,
    pub job_id: i64,
    /// 1-based, assigned at admission
    pub attempt_no: i64,
    pub created_at: DateTime<Utc>,
    /// Set when the engine moves the job to RUNNING
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
}

impl Attempt {
    pub fn is_open(&self) -> bool {
        self.completed_at.is_none()
    }

    /// Calculate duration from timestamps
    pub fn duration_ms(&self) -> Option<i64> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        Some(completed.signed_duration_since(started).num_milliseconds())
    }
}

/// Pipeline stage a log entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStage {
    SecretFetch,
    Snapshot,
    Apply,
    Verify,
    Rollback,
    Exception,
    Admission,
    Reconcile,
}

impl LogStage {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "secret_fetch" => Some(Self::SecretFetch),
            "snapshot" => Some(Self::Snapshot),
            "apply" => Some(Self::Apply),
            "verify" => Some(Self::Verify),
            "rollback" => Some(Self::Rollback),
            "exception" => Some(Self::Exception),
            "admission" => Some(Self::Admission),
            "reconcile" => Some(Self::Reconcile),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SecretFetch => "secret_fetch",
            Self::Snapshot => "snapshot",
            Self::Apply => "apply",
            Self::Verify => "verify",
            Self::Rollback => "rollback",
            Self::Exception => "exception",
            Self::Admission => "admission",
            Self::Reconcile => "reconcile",
        }
    }
}

/// JobLog model - append-only output of one pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobLog {
    pub id: i64,
    pub job_id: i64,
    pub attempt_id: Option<i64>,
    #[sqlx(rename = "stage")]
    pub stage_str: String,
    pub output: Option<String>,
    pub exit_code: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl JobLog {
    pub fn stage(&self) -> Option<LogStage> {
        LogStage::from_str(&self.stage_str)
    }
}

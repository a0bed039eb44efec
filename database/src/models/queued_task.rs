use chrono::{DateTime, Utc};
use confpush_core::{DeployTask, Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle of a queued task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Claimed,
    Done,
    TimedOut,
}

impl TaskState {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "claimed" => Some(Self::Claimed),
            "done" => Some(Self::Done),
            "timed_out" => Some(Self::TimedOut),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Claimed => "claimed",
            Self::Done => "done",
            Self::TimedOut => "timed_out",
        }
    }
}

/// QueuedTask model - one (job, attempt) pair waiting for or held by a worker
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QueuedTask {
    pub id: i64,
    pub job_id: i64,
    pub attempt_id: i64,
    /// JSON-encoded `DeployTask`
    pub payload: String,
    #[sqlx(rename = "state")]
    pub state_str: String,
    pub enqueued_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// JSON-encoded `ExecutionOutcome`
    pub outcome: Option<String>,
}

impl QueuedTask {
    pub fn state(&self) -> Option<TaskState> {
        TaskState::from_str(&self.state_str)
    }

    /// Decode the task payload
    pub fn task(&self) -> Result<DeployTask> {
        serde_json::from_str(&self.payload).map_err(|e| {
            Error::QueueError(format!("queued task {} has invalid payload: {}", self.id, e))
        })
    }
}

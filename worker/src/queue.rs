//! Task execution contract
//!
//! Admission hands a [`DeployTask`] to a [`TaskQueue`] and returns at once;
//! workers claim tasks and run them to completion. The SQLite implementation
//! keeps tasks durable across restarts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::{debug, instrument};

use confpush_core::{DeployTask, ExecutionOutcome, Result};
use confpush_database::{models::TaskState, queries};

/// Reference to an enqueued task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub id: i64,
    pub job_id: i64,
    pub attempt_id: i64,
}

/// A task handed to exactly one worker
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub handle: TaskHandle,
    pub task: DeployTask,
}

/// Queue between admission and the worker pool
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a task; returns without waiting for execution
    async fn enqueue(&self, task: DeployTask) -> Result<TaskHandle>;

    /// Claim the next task, if any; a task is never claimed twice
    async fn claim(&self) -> Result<Option<ClaimedTask>>;

    /// Record the outcome of a finished task
    async fn complete(&self, handle: &TaskHandle, outcome: &ExecutionOutcome) -> Result<()>;

    /// Record that a task was abandoned at the hard time limit
    async fn time_out(&self, handle: &TaskHandle) -> Result<()>;
}

/// Durable queue over the `queued_tasks` table
#[derive(Clone)]
pub struct SqliteTaskQueue {
    pool: Pool<Sqlite>,
}

impl SqliteTaskQueue {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskQueue for SqliteTaskQueue {
    #[instrument(skip(self, task), fields(job_id = task.job_id, attempt_id = task.attempt_id))]
    async fn enqueue(&self, task: DeployTask) -> Result<TaskHandle> {
        let id = queries::enqueue_task(&self.pool, &task).await?;
        debug!(task_id = id, "Task enqueued");

        Ok(TaskHandle {
            id,
            job_id: task.job_id,
            attempt_id: task.attempt_id,
        })
    }

    async fn claim(&self) -> Result<Option<ClaimedTask>> {
        let Some(row) = queries::claim_next_task(&self.pool).await? else {
            return Ok(None);
        };

        let handle = TaskHandle {
            id: row.id,
            job_id: row.job_id,
            attempt_id: row.attempt_id,
        };
        match row.task() {
            Ok(task) => Ok(Some(ClaimedTask { handle, task })),
            Err(e) => {
                // Never retried: an undecodable payload stays undecodable
                queries::finish_task(&self.pool, row.id, TaskState::Done, None).await?;
                Err(e)
            }
        }
    }

    async fn complete(&self, handle: &TaskHandle, outcome: &ExecutionOutcome) -> Result<()> {
        let outcome = serde_json::to_string(outcome)?;
        queries::finish_task(&self.pool, handle.id, TaskState::Done, Some(&outcome)).await
    }

    async fn time_out(&self, handle: &TaskHandle) -> Result<()> {
        queries::finish_task(&self.pool, handle.id, TaskState::TimedOut, None).await
    }
}

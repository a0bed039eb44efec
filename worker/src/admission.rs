//! Admission: turn a push request into an attempt and a queued task

use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{Pool, Sqlite};
use tracing::{error, info, instrument};

use confpush_core::{DeployTask, Result};
use confpush_database::{
    models::{AuditRecord, JobStatus, LogStage},
    queries::{self, LogEntry},
};

use crate::queue::{TaskHandle, TaskQueue};

/// Payload of a push request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushRequest {
    pub config_lines: Vec<String>,
    #[serde(default)]
    pub verify_commands: Vec<String>,
}

/// Result of a successful admission
#[derive(Debug, Clone, Serialize)]
pub struct Admission {
    pub job_id: i64,
    pub attempt_id: i64,
    pub attempt_no: i64,
    pub task: TaskHandle,
}

/// Admit a job for execution
///
/// The job moves to RUNNING and a new attempt is opened in one transaction;
/// a job that is already RUNNING yields `Error::AlreadyRunning`. The task is
/// enqueued after commit. If enqueueing fails the attempt is closed and the
/// job marked FAILED so it can be admitted again.
#[instrument(skip(pool, queue, request), fields(lines = request.config_lines.len()))]
pub async fn admit(
    pool: &Pool<Sqlite>,
    queue: &dyn TaskQueue,
    job_id: i64,
    actor: &str,
    request: PushRequest,
) -> Result<Admission> {
    let admitted = queries::admit_job(pool, job_id).await?;

    let task = DeployTask {
        job_id,
        attempt_id: admitted.attempt_id,
        config_lines: request.config_lines,
        verify_commands: request.verify_commands,
    };
    let line_count = task.config_lines.len();

    let handle = match queue.enqueue(task).await {
        Ok(handle) => handle,
        Err(e) => {
            error!(job_id, attempt_id = admitted.attempt_id, error = %e, "Failed to enqueue task");
            queries::append_log(
                pool,
                LogEntry {
                    job_id,
                    attempt_id: Some(admitted.attempt_id),
                    stage: LogStage::Admission,
                    output: &format!("Enqueue failed: {}", e),
                    exit_code: 1,
                },
            )
            .await?;
            queries::finish_attempt(pool, job_id, admitted.attempt_id, JobStatus::Failed, 1)
                .await?;
            return Err(e);
        }
    };

    let target = format!("job:{}", job_id);
    queries::record_audit_event(
        pool,
        AuditRecord {
            actor,
            action: "push_config",
            target: Some(&target),
            details: Some(json!({
                "attempt_id": admitted.attempt_id,
                "attempt_no": admitted.attempt_no,
                "task_id": handle.id,
                "config_lines": line_count,
            })),
        },
    )
    .await?;

    info!(
        job_id,
        attempt_id = admitted.attempt_id,
        attempt_no = admitted.attempt_no,
        actor,
        "Job admitted"
    );

    Ok(Admission {
        job_id,
        attempt_id: admitted.attempt_id,
        attempt_no: admitted.attempt_no,
        task: handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{ClaimedTask, SqliteTaskQueue};
    use async_trait::async_trait;
    use confpush_core::{Error, ExecutionOutcome, PlatformKind};
    use confpush_database::{
        models::{CreateDevice, CreateJob},
        Database,
    };

    async fn seed_job(db: &Database) -> i64 {
        let device_id = queries::create_device(
            db.pool(),
            &CreateDevice {
                name: "agg-1".into(),
                ip: "192.0.2.60".into(),
                platform: PlatformKind::JuniperJunos,
                port: 22,
                credentials_ref: "devices/agg-1".into(),
            },
        )
        .await
        .unwrap();
        queries::create_job(
            db.pool(),
            &CreateJob {
                name: "syslog".into(),
                device_id,
                command: "set system syslog host 192.0.2.5".into(),
            },
        )
        .await
        .unwrap()
    }

    fn request() -> PushRequest {
        PushRequest {
            config_lines: vec!["set system syslog host 192.0.2.5 any any".into()],
            verify_commands: vec!["show configuration system syslog".into()],
        }
    }

    #[tokio::test]
    async fn test_admit_enqueues_and_audits() {
        let db = Database::in_memory().await.unwrap();
        let job_id = seed_job(&db).await;
        let queue = SqliteTaskQueue::new(db.pool().clone());

        let admission = admit(db.pool(), &queue, job_id, "alice", request())
            .await
            .unwrap();
        assert_eq!(admission.attempt_no, 1);

        let claimed = queue.claim().await.unwrap().unwrap();
        assert_eq!(claimed.handle, admission.task);
        assert_eq!(claimed.task.attempt_id, admission.attempt_id);

        let events = queries::list_audit_events(db.pool(), 10).await.unwrap();
        assert_eq!(events[0].actor, "alice");
        assert_eq!(events[0].action, "push_config");
        assert_eq!(events[0].target.as_deref(), Some(format!("job:{}", job_id).as_str()));
    }

    #[tokio::test]
    async fn test_second_admission_already_running() {
        let db = Database::in_memory().await.unwrap();
        let job_id = seed_job(&db).await;
        let queue = SqliteTaskQueue::new(db.pool().clone());

        admit(db.pool(), &queue, job_id, "alice", request())
            .await
            .unwrap();
        let err = admit(db.pool(), &queue, job_id, "bob", request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning(_)));
        assert_eq!(err.kind(), confpush_core::ErrorKind::ConfigError);

        assert_eq!(queries::list_attempts(db.pool(), job_id).await.unwrap().len(), 1);
    }

    struct BrokenQueue;

    #[async_trait]
    impl TaskQueue for BrokenQueue {
        async fn enqueue(&self, _task: DeployTask) -> Result<TaskHandle> {
            Err(Error::QueueError("broker unavailable".into()))
        }

        async fn claim(&self) -> Result<Option<ClaimedTask>> {
            Ok(None)
        }

        async fn complete(&self, _handle: &TaskHandle, _outcome: &ExecutionOutcome) -> Result<()> {
            Ok(())
        }

        async fn time_out(&self, _handle: &TaskHandle) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_enqueue_failure_releases_job() {
        let db = Database::in_memory().await.unwrap();
        let job_id = seed_job(&db).await;

        let err = admit(db.pool(), &BrokenQueue, job_id, "alice", request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QueueError(_)));

        let job = queries::find_job(db.pool(), job_id).await.unwrap().unwrap();
        assert_eq!(job.status(), Some(JobStatus::Failed));
        assert!(queries::list_open_attempts(db.pool()).await.unwrap().is_empty());

        let logs = queries::list_logs(db.pool(), job_id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].stage(), Some(LogStage::Admission));

        // Admission works again once the queue is back
        let queue = SqliteTaskQueue::new(db.pool().clone());
        let admission = admit(db.pool(), &queue, job_id, "alice", request())
            .await
            .unwrap();
        assert_eq!(admission.attempt_no, 2);
    }
}

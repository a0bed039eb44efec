//! Recovery for attempts whose worker never finished
//!
//! A task abandoned at the hard time limit, or lost with its worker, leaves
//! the job RUNNING with an open attempt. Reconciliation closes such attempts
//! and fails the job. It does not roll back: the device may or may not have
//! taken the change, so restoring the latest snapshot is left to an operator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::{Pool, Sqlite};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use confpush_core::{Error, Result};
use confpush_database::{
    models::{AuditRecord, JobStatus, LogStage},
    queries::{self, LogEntry},
};

/// Exit code recorded on attempts closed by reconciliation
pub const TIMED_OUT_EXIT_CODE: i32 = 124;

/// An attempt closed by a reconciliation pass
#[derive(Debug, Clone, Serialize)]
pub struct ReconciledAttempt {
    pub job_id: i64,
    pub attempt_id: i64,
    pub attempt_no: i64,
    /// Latest snapshot of the job's device, the candidate for a manual rollback
    pub snapshot_path: Option<String>,
}

/// Closes attempts that outlived the hard task time limit
pub struct Reconciler {
    pool: Pool<Sqlite>,
    hard_timeout: Duration,
}

impl Reconciler {
    pub fn new(pool: Pool<Sqlite>, hard_timeout: Duration) -> Self {
        Self { pool, hard_timeout }
    }

    /// One reconciliation pass as of `now`
    #[instrument(skip(self))]
    pub async fn reconcile(&self, now: DateTime<Utc>) -> Result<Vec<ReconciledAttempt>> {
        let limit = chrono::Duration::from_std(self.hard_timeout)
            .map_err(|e| Error::ConfigError(format!("Invalid hard timeout: {}", e)))?;
        let stale = queries::list_stale_attempts(&self.pool, now - limit).await?;

        let mut reconciled = Vec::with_capacity(stale.len());
        for attempt in stale {
            let closed = queries::finish_attempt(
                &self.pool,
                attempt.job_id,
                attempt.id,
                JobStatus::Failed,
                TIMED_OUT_EXIT_CODE,
            )
            .await?;
            if !closed {
                // Finished by its worker in the meantime
                continue;
            }
            queries::expire_attempt_tasks(&self.pool, attempt.id).await?;

            let snapshot_path = match queries::find_job(&self.pool, attempt.job_id).await? {
                Some(job) => queries::latest_snapshot_for_device(&self.pool, job.device_id)
                    .await?
                    .map(|s| s.filename),
                None => None,
            };

            let output = format!(
                "Attempt {} exceeded the hard time limit of {}s and was closed; device state unknown. Latest snapshot: {}",
                attempt.attempt_no,
                self.hard_timeout.as_secs(),
                snapshot_path.as_deref().unwrap_or("none"),
            );
            queries::append_log(
                &self.pool,
                LogEntry {
                    job_id: attempt.job_id,
                    attempt_id: Some(attempt.id),
                    stage: LogStage::Reconcile,
                    output: &output,
                    exit_code: TIMED_OUT_EXIT_CODE,
                },
            )
            .await?;

            let target = format!("job:{}", attempt.job_id);
            queries::record_audit_event(
                &self.pool,
                AuditRecord {
                    actor: "reconciler",
                    action: "reconcile_attempt",
                    target: Some(&target),
                    details: Some(json!({
                        "attempt_id": attempt.id,
                        "attempt_no": attempt.attempt_no,
                        "snapshot_path": snapshot_path,
                    })),
                },
            )
            .await?;

            warn!(
                job_id = attempt.job_id,
                attempt_id = attempt.id,
                snapshot = snapshot_path.as_deref().unwrap_or("none"),
                "Closed stale attempt"
            );
            reconciled.push(ReconciledAttempt {
                job_id: attempt.job_id,
                attempt_id: attempt.id,
                attempt_no: attempt.attempt_no,
                snapshot_path,
            });
        }

        Ok(reconciled)
    }

    /// Reconcile every `interval` until `shutdown` flips to true
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "Reconciler started");
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile(Utc::now()).await {
                        error!(error = %e, "Reconciliation pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Reconciler stopped");
    }
}

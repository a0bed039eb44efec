//! Config deployment engine
//!
//! Runs one attempt of a job through the pipeline:
//!
//! 1. Load the job, the attempt and the device
//! 2. Resolve the device credentials
//! 3. Mark the job RUNNING
//! 4. Snapshot the running configuration
//! 5. Apply the configuration lines
//! 6. Verify, rolling back to the snapshot on failure
//!
//! Every stage commits before the next one starts, and every terminal path
//! closes the attempt so the job can be admitted again.

use chrono::Utc;
use serde_json::json;
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use confpush_core::{
    Credentials, DeviceOps, DeviceTarget, Error, ExecutionOutcome, FailureReason, Result,
    SecretsResolver, SessionFactory, Settings, SnapshotStore,
};
use confpush_database::{
    models::{JobStatus, LogStage, NewSnapshot},
    queries::{self, LogEntry},
    record_metric,
};

/// Exit code used when a failure has no device-provided code
const GENERIC_FAILURE: i32 = 1;

/// Exit code logged for credential resolution failures
const SECRET_FAILURE: i32 = 2;

/// Executes deployment attempts against devices
pub struct DeploymentEngine {
    pool: Pool<Sqlite>,
    settings: Arc<Settings>,
    secrets: SecretsResolver,
    snapshots: SnapshotStore,
    ops: DeviceOps,
}

impl DeploymentEngine {
    /// Create a new engine
    ///
    /// # Arguments
    ///
    /// * `pool` - Database connection pool
    /// * `settings` - Shared immutable settings
    /// * `sessions` - Opens sessions to devices
    pub fn new(
        pool: Pool<Sqlite>,
        settings: Arc<Settings>,
        sessions: Arc<dyn SessionFactory>,
    ) -> Result<Self> {
        let secrets = SecretsResolver::new(settings.clone())?;
        let snapshots = SnapshotStore::new(settings.snapshot_dir.clone());

        Ok(Self {
            pool,
            settings,
            secrets,
            snapshots,
            ops: DeviceOps::new(sessions),
        })
    }

    /// Execute one attempt of a job (main entry point)
    ///
    /// Unexpected errors are caught here once: they are logged against the
    /// job, the job is forced to FAILED and the attempt closed. An `Err` is
    /// only returned when recording that failure itself fails.
    #[instrument(skip(self, config_lines, verify_commands))]
    pub async fn execute(
        &self,
        job_id: i64,
        attempt_id: i64,
        config_lines: &[String],
        verify_commands: &[String],
    ) -> Result<ExecutionOutcome> {
        let started = Instant::now();
        info!(job_id, attempt_id, lines = config_lines.len(), "Starting attempt");

        let outcome = match self
            .run(job_id, attempt_id, config_lines, verify_commands)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(job_id, attempt_id, error = %e, "Attempt aborted by unexpected error");
                self.record_exception(job_id, attempt_id, &e).await?;
                ExecutionOutcome::failed(job_id, attempt_id, FailureReason::InternalError)
                    .with_error(e.to_string())
            }
        };

        self.record_metrics(&outcome, started.elapsed().as_secs_f64())
            .await;

        match outcome.reason {
            None => info!(job_id, attempt_id, "Attempt succeeded"),
            Some(reason) => warn!(
                job_id,
                attempt_id,
                reason = %reason,
                device_dirty = outcome.device_dirty,
                "Attempt did not succeed"
            ),
        }

        Ok(outcome)
    }

    async fn run(
        &self,
        job_id: i64,
        attempt_id: i64,
        config_lines: &[String],
        verify_commands: &[String],
    ) -> Result<ExecutionOutcome> {
        let missing = || ExecutionOutcome::failed(job_id, attempt_id, FailureReason::JobOrAttemptNotFound);

        let Some(job) = queries::find_job(&self.pool, job_id).await? else {
            warn!(job_id, "Job not found");
            return Ok(missing());
        };
        let attempt = match queries::find_attempt(&self.pool, attempt_id).await? {
            Some(attempt) if attempt.job_id == job_id => attempt,
            _ => {
                warn!(job_id, attempt_id, "Attempt not found for job");
                return Ok(missing());
            }
        };
        if !attempt.is_open() {
            warn!(job_id, attempt_id, "Attempt already closed; not executing");
            return Ok(missing().with_error(format!("attempt {} is already closed", attempt_id)));
        }

        // Device
        let Some(device) = queries::find_device(&self.pool, job.device_id).await? else {
            self.finish(job_id, attempt_id, JobStatus::Failed, GENERIC_FAILURE)
                .await?;
            return Ok(ExecutionOutcome::failed(
                job_id,
                attempt_id,
                FailureReason::DeviceNotFound,
            ));
        };
        let target = device.target()?;

        // Credentials
        let credentials = match self.secrets.resolve(&device.credentials_ref).await {
            Ok(credentials) => {
                self.log(
                    job_id,
                    attempt_id,
                    LogStage::SecretFetch,
                    &format!("Resolved credentials from reference {}", device.credentials_ref),
                    0,
                )
                .await?;
                credentials
            }
            Err(e) => {
                self.log(
                    job_id,
                    attempt_id,
                    LogStage::SecretFetch,
                    &format!("Secret fetch failed: {}", e),
                    SECRET_FAILURE,
                )
                .await?;
                self.finish(job_id, attempt_id, JobStatus::Failed, SECRET_FAILURE)
                    .await?;
                return Ok(ExecutionOutcome::failed(
                    job_id,
                    attempt_id,
                    FailureReason::SecretFetchFailed,
                )
                .with_error(e.to_string()));
            }
        };

        // Committed before any device I/O
        if !queries::mark_attempt_started(&self.pool, job_id, attempt_id, Utc::now()).await? {
            warn!(job_id, attempt_id, "Attempt closed before start; device untouched");
            return Ok(missing().with_error(format!("attempt {} is already closed", attempt_id)));
        }
        debug!(job_id, attempt_id, device = %target.display(), "Job running");

        // Snapshot
        let running = self.ops.fetch_running_config(&target, &credentials).await;
        if !running.success() {
            self.log(
                job_id,
                attempt_id,
                LogStage::Snapshot,
                &format!("Snapshot failed: {}", running.output),
                running.exit_code,
            )
            .await?;
            self.finish(job_id, attempt_id, JobStatus::Failed, running.exit_code)
                .await?;
            return Ok(ExecutionOutcome::failed(
                job_id,
                attempt_id,
                FailureReason::SnapshotFailed,
            ));
        }

        let path = self.snapshots.save(device.id, &running.output).await?;
        let snapshot_path = path.display().to_string();
        queries::create_snapshot(
            &self.pool,
            NewSnapshot {
                device_id: device.id,
                attempt_id: Some(attempt_id),
                filename: &snapshot_path,
                content: self
                    .settings
                    .inline_snapshot_content
                    .then_some(running.output.as_str()),
            },
        )
        .await?;
        self.log(
            job_id,
            attempt_id,
            LogStage::Snapshot,
            &format!("Snapshot saved to {}", snapshot_path),
            0,
        )
        .await?;

        // Apply
        if config_lines.is_empty() {
            self.finish(job_id, attempt_id, JobStatus::Failed, GENERIC_FAILURE)
                .await?;
            return Ok(
                ExecutionOutcome::failed(job_id, attempt_id, FailureReason::NoConfigLines)
                    .with_snapshot(snapshot_path),
            );
        }

        let applied = self
            .ops
            .apply_config(&target, &credentials, config_lines)
            .await;
        self.log(
            job_id,
            attempt_id,
            LogStage::Apply,
            &applied.output,
            applied.exit_code,
        )
        .await?;

        if !applied.success() {
            let restored = self
                .rollback(job_id, attempt_id, &target, &credentials, &snapshot_path)
                .await?;
            self.finish(job_id, attempt_id, JobStatus::Failed, applied.exit_code)
                .await?;
            let mut outcome =
                ExecutionOutcome::failed(job_id, attempt_id, FailureReason::ApplyFailed)
                    .with_snapshot(snapshot_path);
            outcome.device_dirty = !restored;
            return Ok(outcome);
        }

        // Verify
        let verified = self
            .ops
            .verify_config(&target, &credentials, verify_commands)
            .await;
        let verify_exit = if verified.passed { 0 } else { GENERIC_FAILURE };
        self.log(
            job_id,
            attempt_id,
            LogStage::Verify,
            &verified.output,
            verify_exit,
        )
        .await?;

        if !verified.passed {
            let restored = self
                .rollback(job_id, attempt_id, &target, &credentials, &snapshot_path)
                .await?;
            self.finish(job_id, attempt_id, JobStatus::Failed, GENERIC_FAILURE)
                .await?;
            let mut outcome =
                ExecutionOutcome::failed(job_id, attempt_id, FailureReason::VerifyFailed)
                    .with_snapshot(snapshot_path);
            outcome.device_dirty = !restored;
            return Ok(outcome);
        }

        self.finish(job_id, attempt_id, JobStatus::Success, 0).await?;
        Ok(ExecutionOutcome::success(
            job_id,
            attempt_id,
            Some(snapshot_path),
        ))
    }

    /// Replay the attempt's snapshot; returns whether the device was restored
    async fn rollback(
        &self,
        job_id: i64,
        attempt_id: i64,
        target: &DeviceTarget,
        credentials: &Credentials,
        snapshot_path: &str,
    ) -> Result<bool> {
        info!(job_id, attempt_id, snapshot = %snapshot_path, "Rolling back");

        let result = self
            .snapshots
            .restore(&self.ops, target, credentials, snapshot_path)
            .await;
        let output = format!("Rollback from {}: {}", snapshot_path, result.output);
        self.log(
            job_id,
            attempt_id,
            LogStage::Rollback,
            &output,
            result.exit_code,
        )
        .await?;

        if !result.success() {
            error!(
                job_id,
                attempt_id,
                device = %target.display(),
                exit_code = result.exit_code,
                snapshot = %snapshot_path,
                "Rollback failed; device configuration is in an unknown state"
            );
        }
        Ok(result.success())
    }

    async fn log(
        &self,
        job_id: i64,
        attempt_id: i64,
        stage: LogStage,
        output: &str,
        exit_code: i32,
    ) -> Result<()> {
        queries::append_log(
            &self.pool,
            LogEntry {
                job_id,
                attempt_id: Some(attempt_id),
                stage,
                output,
                exit_code,
            },
        )
        .await?;
        Ok(())
    }

    async fn finish(
        &self,
        job_id: i64,
        attempt_id: i64,
        status: JobStatus,
        exit_code: i32,
    ) -> Result<()> {
        if !queries::finish_attempt(&self.pool, job_id, attempt_id, status, exit_code).await? {
            warn!(job_id, attempt_id, "Attempt was already closed");
        }
        Ok(())
    }

    async fn record_exception(&self, job_id: i64, attempt_id: i64, err: &Error) -> Result<()> {
        let output = format!("{} ({:?})\n{:?}", err, err.kind(), err);
        self.log(
            job_id,
            attempt_id,
            LogStage::Exception,
            &output,
            GENERIC_FAILURE,
        )
        .await?;
        self.finish(job_id, attempt_id, JobStatus::Failed, GENERIC_FAILURE)
            .await
    }

    async fn record_metrics(&self, outcome: &ExecutionOutcome, seconds: f64) {
        let labels = json!({
            "status": outcome.status,
            "reason": outcome.reason,
        });

        if let Err(e) = record_metric(
            &self.pool,
            "job_execution_seconds",
            seconds,
            Some("seconds"),
            Some(&labels),
        )
        .await
        {
            warn!(error = %e, "Failed to record execution time");
        }
        if let Err(e) =
            record_metric(&self.pool, "jobs_pushed_total", 1.0, Some("count"), Some(&labels)).await
        {
            warn!(error = %e, "Failed to record push counter");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confpush_core::secrets::env_var_name;
    use confpush_core::testing::{ScriptedDevice, ScriptedSessions};
    use confpush_core::{CommandResult, OutcomeStatus, PlatformKind};
    use confpush_database::{
        list_metrics,
        models::{CreateDevice, CreateJob, JobLog},
        Database,
    };
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RUNNING_CONFIG: &str = "hostname edge-7\ninterface Gi0/1\n description uplink";

    struct Harness {
        db: Database,
        engine: DeploymentEngine,
        device: ScriptedDevice,
        device_id: i64,
        job_id: i64,
        attempt_id: i64,
        _dir: TempDir,
    }

    /// Each test uses its own credential reference so env vars never collide
    async fn harness(name: &str, secret: Option<&str>) -> Harness {
        let reference = format!("confpush_test/{}", name);
        if let Some(secret) = secret {
            std::env::set_var(env_var_name(&reference), secret);
        }
        build_harness(name, None).await
    }

    /// Credentials come from a secrets backend at `vault_url`
    async fn harness_with_backend(name: &str, vault_url: String) -> Harness {
        build_harness(name, Some(vault_url)).await
    }

    async fn build_harness(name: &str, vault_url: Option<String>) -> Harness {
        let reference = format!("confpush_test/{}", name);
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            snapshot_dir: dir.path().to_path_buf(),
            vault_token: vault_url.as_ref().map(|_| "t0ken".to_string()),
            vault_url,
            ..Settings::default()
        };

        let db = Database::in_memory().await.unwrap();
        let device_id = queries::create_device(
            db.pool(),
            &CreateDevice {
                name: format!("edge-{}", name),
                ip: "192.0.2.7".into(),
                platform: PlatformKind::CiscoIos,
                port: 22,
                credentials_ref: reference,
            },
        )
        .await
        .unwrap();
        let job_id = queries::create_job(
            db.pool(),
            &CreateJob {
                name: "uplink description".into(),
                device_id,
                command: "interface Gi0/1".into(),
            },
        )
        .await
        .unwrap();
        let attempt_id = queries::admit_job(db.pool(), job_id)
            .await
            .unwrap()
            .attempt_id;

        let device = ScriptedDevice::new(RUNNING_CONFIG);
        let engine = DeploymentEngine::new(
            db.pool().clone(),
            Arc::new(settings),
            ScriptedSessions::shared(device.clone()),
        )
        .unwrap();

        Harness {
            db,
            engine,
            device,
            device_id,
            job_id,
            attempt_id,
            _dir: dir,
        }
    }

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    impl Harness {
        async fn run(&self, config: &[&str], verify: &[&str]) -> ExecutionOutcome {
            self.engine
                .execute(self.job_id, self.attempt_id, &lines(config), &lines(verify))
                .await
                .unwrap()
        }

        async fn status(&self) -> Option<JobStatus> {
            queries::find_job(self.db.pool(), self.job_id)
                .await
                .unwrap()
                .unwrap()
                .status()
        }

        async fn logs(&self) -> Vec<JobLog> {
            queries::list_logs(self.db.pool(), self.job_id).await.unwrap()
        }

        async fn stages(&self) -> Vec<LogStage> {
            self.logs().await.iter().filter_map(|l| l.stage()).collect()
        }

        async fn attempt_exit_code(&self) -> Option<i32> {
            let attempt = queries::find_attempt(self.db.pool(), self.attempt_id)
                .await
                .unwrap()
                .unwrap();
            assert!(!attempt.is_open(), "attempt left open");
            attempt.exit_code
        }
    }

    #[tokio::test]
    async fn test_empty_config_lines() {
        let h = harness("empty_config", Some("netops:s3cret")).await;

        let outcome = h.run(&[], &["show ip interface brief"]).await;
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.reason, Some(FailureReason::NoConfigLines));
        assert_eq!(h.status().await, Some(JobStatus::Failed));
        assert_eq!(h.attempt_exit_code().await, Some(1));
        assert!(h.device.applied().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_read_failure() {
        let h = harness("snapshot_read", Some("netops:s3cret")).await;
        h.device.respond_with(
            "show running-config",
            CommandResult::failed(2, "session timed out"),
        );

        let outcome = h.run(&["interface Gi0/1", " description core"], &[]).await;
        assert_eq!(outcome.reason, Some(FailureReason::SnapshotFailed));
        assert_eq!(h.status().await, Some(JobStatus::Failed));
        assert_eq!(h.attempt_exit_code().await, Some(2));

        assert!(queries::list_snapshots_for_device(h.db.pool(), h.device_id)
            .await
            .unwrap()
            .is_empty());
        assert!(h.device.applied().is_empty());

        let logs = h.logs().await;
        let last = logs.last().unwrap();
        assert_eq!(last.stage(), Some(LogStage::Snapshot));
        assert_eq!(last.exit_code, Some(2));
    }

    #[tokio::test]
    async fn test_verify_failure_rolls_back() {
        let h = harness("verify_rollback", Some("netops:s3cret")).await;
        h.device.respond(
            "show interfaces description",
            "                 ^\n% invalid input detected at '^' marker.",
        );

        let outcome = h
            .run(
                &["interface Gi0/1", " description core"],
                &["show interfaces description"],
            )
            .await;
        assert_eq!(outcome.reason, Some(FailureReason::VerifyFailed));
        assert!(!outcome.device_dirty);
        assert_eq!(h.status().await, Some(JobStatus::Failed));
        assert_eq!(h.attempt_exit_code().await, Some(1));

        // The change, then the snapshot replayed
        let applied = h.device.applied();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[1], lines(&RUNNING_CONFIG.lines().collect::<Vec<_>>()));

        let snapshot_path = outcome.snapshot_path.clone().unwrap();
        let snapshot = queries::latest_snapshot_for_device(h.db.pool(), h.device_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.filename, snapshot_path);
        assert_eq!(snapshot.attempt_id, Some(h.attempt_id));

        let logs = h.logs().await;
        let rollback = logs
            .iter()
            .find(|l| l.stage() == Some(LogStage::Rollback))
            .unwrap();
        assert!(rollback.output.as_deref().unwrap().contains(&snapshot_path));
        assert_eq!(rollback.exit_code, Some(0));
        assert_eq!(
            h.stages().await,
            vec![
                LogStage::SecretFetch,
                LogStage::Snapshot,
                LogStage::Apply,
                LogStage::Verify,
                LogStage::Rollback,
            ]
        );
    }

    #[tokio::test]
    async fn test_full_success() {
        let h = harness("full_success", Some("netops:s3cret:en4ble")).await;
        h.device
            .respond("show interfaces description", "Gi0/1  up  up  core");

        let outcome = h
            .run(
                &["interface Gi0/1", " description core"],
                &["show interfaces description"],
            )
            .await;
        assert!(outcome.is_success());
        assert_eq!(h.status().await, Some(JobStatus::Success));
        assert_eq!(h.attempt_exit_code().await, Some(0));

        let logs = h.logs().await;
        assert_eq!(
            h.stages().await,
            vec![
                LogStage::SecretFetch,
                LogStage::Snapshot,
                LogStage::Apply,
                LogStage::Verify,
            ]
        );
        assert!(logs.windows(2).all(|w| w[0].created_at < w[1].created_at));
        assert!(logs.iter().all(|l| l.exit_code == Some(0)));
        assert!(logs
            .iter()
            .all(|l| !l.output.as_deref().unwrap_or_default().contains("s3cret")));

        // Snapshot committed before apply, content inlined
        let snapshot = queries::find_snapshot_for_attempt(h.db.pool(), h.attempt_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.content.as_deref(), Some(RUNNING_CONFIG));
        assert!(std::path::Path::new(&snapshot.filename).is_absolute());
        assert_eq!(
            h.engine.snapshots.load(&snapshot.filename).await.unwrap(),
            RUNNING_CONFIG
        );

        let attempt = queries::find_attempt(h.db.pool(), h.attempt_id)
            .await
            .unwrap()
            .unwrap();
        assert!(attempt.started_at.is_some());

        assert_eq!(
            list_metrics(h.db.pool(), "jobs_pushed_total")
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            list_metrics(h.db.pool(), "job_execution_seconds")
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_apply_failure_rolls_back() {
        let h = harness("apply_failure", Some("netops:s3cret")).await;
        h.device
            .queue_apply(CommandResult::failed(1, "% Invalid input detected"));

        let outcome = h.run(&["interface Gi0/99"], &[]).await;
        assert_eq!(outcome.reason, Some(FailureReason::ApplyFailed));
        assert!(!outcome.device_dirty);
        assert_eq!(h.status().await, Some(JobStatus::Failed));
        assert_eq!(h.attempt_exit_code().await, Some(1));

        let stages = h.stages().await;
        assert_eq!(stages.last(), Some(&LogStage::Rollback));
        assert!(!stages.contains(&LogStage::Verify));
        assert_eq!(h.device.applied().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_rollback_marks_device_dirty() {
        let h = harness("rollback_failure", Some("netops:s3cret")).await;
        h.device.queue_apply(CommandResult::failed(1, "commit failed"));
        h.device
            .queue_apply(CommandResult::failed(2, "connection lost"));

        let outcome = h.run(&["interface Gi0/1"], &[]).await;
        assert_eq!(outcome.reason, Some(FailureReason::ApplyFailed));
        assert!(outcome.device_dirty);
        assert_eq!(h.status().await, Some(JobStatus::Failed));

        let logs = h.logs().await;
        let rollback = logs.last().unwrap();
        assert_eq!(rollback.stage(), Some(LogStage::Rollback));
        assert_eq!(rollback.exit_code, Some(2));
    }

    #[tokio::test]
    async fn test_missing_job_or_attempt() {
        let h = harness("missing", Some("netops:s3cret")).await;

        let outcome = h
            .engine
            .execute(h.job_id + 100, h.attempt_id, &lines(&["x"]), &[])
            .await
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Missing);
        assert_eq!(outcome.reason, Some(FailureReason::JobOrAttemptNotFound));

        let outcome = h
            .engine
            .execute(h.job_id, h.attempt_id + 100, &lines(&["x"]), &[])
            .await
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Missing);

        // Nothing mutated
        assert_eq!(h.status().await, Some(JobStatus::Running));
        assert!(h.logs().await.is_empty());
        assert_eq!(h.device.opens(), 0);
    }

    #[tokio::test]
    async fn test_missing_device() {
        let h = harness("missing_device", Some("netops:s3cret")).await;
        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(h.db.pool())
            .await
            .unwrap();
        sqlx::query("DELETE FROM devices WHERE id = ?")
            .bind(h.device_id)
            .execute(h.db.pool())
            .await
            .unwrap();

        let outcome = h.run(&["interface Gi0/1"], &[]).await;
        assert_eq!(outcome.reason, Some(FailureReason::DeviceNotFound));
        assert_eq!(h.status().await, Some(JobStatus::Failed));
        assert_eq!(h.attempt_exit_code().await, Some(1));
        assert_eq!(h.device.opens(), 0);
    }

    #[tokio::test]
    async fn test_secret_fetch_failure() {
        let h = harness("unset_secret", None).await;

        let outcome = h.run(&["interface Gi0/1"], &[]).await;
        assert_eq!(outcome.reason, Some(FailureReason::SecretFetchFailed));
        assert_eq!(h.status().await, Some(JobStatus::Failed));
        assert_eq!(h.attempt_exit_code().await, Some(2));
        assert_eq!(h.device.opens(), 0);

        let logs = h.logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].stage(), Some(LogStage::SecretFetch));
        assert_eq!(logs[0].exit_code, Some(2));

        // Attempt never started
        let attempt = queries::find_attempt(h.db.pool(), h.attempt_id)
            .await
            .unwrap()
            .unwrap();
        assert!(attempt.started_at.is_none());
    }

    #[tokio::test]
    async fn test_closed_attempt_not_rerun() {
        let h = harness("rerun", Some("netops:s3cret")).await;
        assert!(h.run(&["interface Gi0/1"], &[]).await.is_success());

        let again = h.run(&["interface Gi0/1"], &[]).await;
        assert_eq!(again.status, OutcomeStatus::Missing);
        assert_eq!(h.device.applied().len(), 1);
        assert_eq!(h.status().await, Some(JobStatus::Success));
    }

    #[tokio::test]
    async fn test_attempt_closed_while_resolving_secrets_is_not_pushed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/confpush_test/closed_mid_run"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"data": {"username": "netops", "password": "s3cret"}}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;
        let h = harness_with_backend("closed_mid_run", server.uri()).await;

        let reconcile = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            crate::Reconciler::new(h.db.pool().clone(), Duration::from_secs(60))
                .reconcile(Utc::now() + chrono::Duration::minutes(2))
                .await
                .unwrap()
        };
        let (outcome, reconciled) = tokio::join!(h.run(&["interface Gi0/1"], &[]), reconcile);

        assert_eq!(reconciled.len(), 1);
        assert_eq!(outcome.status, OutcomeStatus::Missing);
        assert_eq!(h.device.opens(), 0);
        assert!(h.device.applied().is_empty());

        // The reconciler's verdict stands
        assert_eq!(h.status().await, Some(JobStatus::Failed));
        assert_eq!(h.attempt_exit_code().await, Some(124));
        let attempt = queries::find_attempt(h.db.pool(), h.attempt_id)
            .await
            .unwrap()
            .unwrap();
        assert!(attempt.started_at.is_none());

        let next = queries::admit_job(h.db.pool(), h.job_id).await.unwrap();
        assert_eq!(next.attempt_no, 2);
        assert_eq!(queries::list_open_attempts(h.db.pool()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_back_to_back_pushes_to_one_device() {
        let h = harness("back_to_back", Some("netops:s3cret")).await;
        let second_job = queries::create_job(
            h.db.pool(),
            &CreateJob {
                name: "second uplink".into(),
                device_id: h.device_id,
                command: "interface Gi0/2".into(),
            },
        )
        .await
        .unwrap();
        let second_attempt = queries::admit_job(h.db.pool(), second_job)
            .await
            .unwrap()
            .attempt_id;

        let second_lines = lines(&["interface Gi0/2"]);
        let (first, second) = tokio::join!(
            h.run(&["interface Gi0/1"], &[]),
            h.engine
                .execute(second_job, second_attempt, &second_lines, &[]),
        );
        let second = second.unwrap();
        assert!(first.is_success());
        assert!(second.is_success(), "{:?}", second.error);

        let snapshots = queries::list_snapshots_for_device(h.db.pool(), h.device_id)
            .await
            .unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_ne!(snapshots[0].filename, snapshots[1].filename);
    }
}

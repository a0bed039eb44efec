//! Worker pool
//!
//! Polls the task queue and runs each claimed task on one worker, with at
//! most `workers` tasks in flight.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};

use confpush_core::{Error, ExecutionOutcome, FailureReason, Result, Settings};

use crate::engine::DeploymentEngine;
use crate::queue::{ClaimedTask, TaskQueue};

/// Bounded pool of workers draining a [`TaskQueue`]
pub struct WorkerPool {
    queue: Arc<dyn TaskQueue>,
    engine: Arc<DeploymentEngine>,
    settings: Arc<Settings>,
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        engine: Arc<DeploymentEngine>,
        settings: Arc<Settings>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(settings.workers.max(1)));

        Self {
            queue,
            engine,
            settings,
            semaphore,
        }
    }

    /// Poll until `shutdown` flips to true, then wait for in-flight tasks
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(workers = self.settings.workers, "Worker pool started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.dispatch_next().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => error!(error = %e, "Failed to dispatch task"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Worker pool draining");
        let workers = u32::try_from(self.settings.workers.max(1)).unwrap_or(u32::MAX);
        let _all = self
            .semaphore
            .acquire_many(workers)
            .await
            .map_err(|e| Error::Other(format!("Failed to acquire semaphore: {}", e)))?;
        info!("Worker pool stopped");
        Ok(())
    }

    /// Claim one task and start it on a free worker
    ///
    /// Waits for a free worker first. Returns `false` when the queue was empty.
    pub async fn dispatch_next(&self) -> Result<bool> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Other(format!("Failed to acquire semaphore: {}", e)))?;

        let Some(claimed) = self.queue.claim().await? else {
            return Ok(false);
        };

        let queue = self.queue.clone();
        let engine = self.engine.clone();
        let soft = self.settings.task_soft_timeout();
        let hard = self.settings.task_hard_timeout();

        tokio::spawn(async move {
            run_task(queue.as_ref(), &engine, claimed, soft, hard).await;
            drop(permit);
        });

        Ok(true)
    }
}

/// Run one claimed task to completion and record how it ended
#[instrument(skip_all, fields(job_id = claimed.task.job_id, attempt_id = claimed.task.attempt_id))]
pub async fn run_task(
    queue: &dyn TaskQueue,
    engine: &DeploymentEngine,
    claimed: ClaimedTask,
    soft: Duration,
    hard: Duration,
) -> Option<ExecutionOutcome> {
    let ClaimedTask { handle, task } = claimed;
    debug!(task_id = handle.id, "Task claimed");

    let execution = engine.execute(
        task.job_id,
        task.attempt_id,
        &task.config_lines,
        &task.verify_commands,
    );

    let Some(result) = with_time_limits(execution, soft, hard).await else {
        error!(
            task_id = handle.id,
            limit_secs = hard.as_secs(),
            "Task exceeded hard time limit; left for reconciliation"
        );
        if let Err(e) = queue.time_out(&handle).await {
            error!(task_id = handle.id, error = %e, "Failed to mark task timed out");
        }
        return None;
    };

    let outcome = result.unwrap_or_else(|e| {
        error!(task_id = handle.id, error = %e, "Engine could not record failure");
        ExecutionOutcome::failed(task.job_id, task.attempt_id, FailureReason::InternalError)
            .with_error(e.to_string())
    });

    if let Err(e) = queue.complete(&handle, &outcome).await {
        error!(task_id = handle.id, error = %e, "Failed to record task outcome");
    }
    Some(outcome)
}

/// Drive `fut` to completion, warning at `soft` and giving up at `hard`
async fn with_time_limits<F: Future>(fut: F, soft: Duration, hard: Duration) -> Option<F::Output> {
    let start = Instant::now();
    tokio::pin!(fut);

    if soft < hard {
        match timeout_at(start + soft, &mut fut).await {
            Ok(output) => return Some(output),
            Err(_) => warn!(limit_secs = soft.as_secs(), "Task exceeded soft time limit"),
        }
    }

    timeout_at(start + hard, fut).await.ok()
}

//! confpush daemon
//!
//! Runs the worker pool that executes queued deployments and the periodic
//! reconciler that closes attempts abandoned by their worker.

use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use confpush_core::{Settings, SshSessionFactory};
use confpush_server::{telemetry, AppState};
use confpush_worker::{DeploymentEngine, Reconciler, SqliteTaskQueue, TaskQueue, WorkerPool};

/// confpush daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "CONFPUSH_CONFIG")]
    config: Option<String>,

    /// Override the configured worker count
    #[arg(short, long)]
    workers: Option<usize>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    telemetry::init(args.json_logs, "info,confpush=debug");

    // Load configuration
    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(workers) = args.workers {
        settings.workers = workers;
        settings.validate()?;
    }
    info!(workers = settings.workers, "Starting confpush daemon");

    let state = AppState::new(settings).await?;
    let settings = state.settings.clone();
    let pool = state.database.pool().clone();

    let sessions = Arc::new(SshSessionFactory::new(settings.session_timeout()));
    let engine = Arc::new(DeploymentEngine::new(pool.clone(), settings.clone(), sessions)?);
    let queue: Arc<dyn TaskQueue> = Arc::new(SqliteTaskQueue::new(pool.clone()));
    let workers = WorkerPool::new(queue, engine, settings.clone());
    let reconciler = Reconciler::new(pool, settings.task_hard_timeout());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconcile_interval = settings.reconcile_interval();
    let reconcile_rx = shutdown_rx.clone();
    let reconcile_handle =
        tokio::spawn(async move { reconciler.run(reconcile_interval, reconcile_rx).await });
    let worker_handle = tokio::spawn(async move { workers.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested; waiting for in-flight deployments");
    shutdown_tx.send(true)?;

    if let Err(e) = worker_handle.await? {
        error!(error = %e, "Worker pool stopped with error");
    }
    reconcile_handle.await?;

    state.database.close().await?;
    info!("confpush daemon stopped");
    Ok(())
}

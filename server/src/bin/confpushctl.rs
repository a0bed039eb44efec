//! confpushctl - operator CLI
//!
//! Registers devices and jobs, submits pushes for the daemon to execute, and
//! inspects job history. Talks to the database directly.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{error, info};

use confpush_core::{PlatformKind, Settings};
use confpush_database::{
    models::{AuditRecord, CreateDevice, CreateJob},
    queries,
};
use confpush_server::{telemetry, AppState};
use confpush_worker::{admit, PushRequest, Reconciler, SqliteTaskQueue};

/// confpushctl - configuration push administration tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "CONFPUSH_CONFIG")]
    config: Option<String>,

    /// Identity recorded on audit events
    #[arg(long, env = "USER", default_value = "cli")]
    actor: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Device management commands
    Device {
        #[command(subcommand)]
        command: DeviceCommands,
    },

    /// Job commands
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },

    /// Close attempts that outlived the hard time limit
    Reconcile,
}

#[derive(Subcommand, Debug)]
enum DeviceCommands {
    /// Register a device
    Add {
        #[arg(long)]
        name: String,

        /// IP address or hostname
        #[arg(long)]
        ip: String,

        /// generic, cisco_ios or juniper_junos
        #[arg(long, default_value = "generic")]
        platform: String,

        #[arg(long, default_value_t = 22)]
        port: u16,

        /// Secrets reference for the device login
        #[arg(long)]
        credentials_ref: String,
    },

    /// List devices
    List,
}

#[derive(Subcommand, Debug)]
enum JobCommands {
    /// Create a job for a device
    Create {
        /// Device ID or name
        #[arg(long)]
        device: String,

        #[arg(long)]
        name: String,

        /// Free-form description of the change
        #[arg(long)]
        command: String,
    },

    /// Submit a push for execution
    Push {
        job_id: i64,

        /// Configuration line (repeatable)
        #[arg(short, long = "line")]
        lines: Vec<String>,

        /// Read configuration lines from a file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Verification command (repeatable)
        #[arg(short, long = "verify")]
        verify: Vec<String>,

        /// Wait until the job reaches a final status
        #[arg(long)]
        wait: bool,
    },

    /// Show a job with its attempts
    Show { job_id: i64 },

    /// Show a job's log history
    Logs { job_id: i64 },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    telemetry::init(false, "warn");

    let cli = Cli::parse();

    let result = match run(cli).await {
        Ok(output) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string())
            );
            Ok(())
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        eprintln!("error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<Value> {
    let settings = Settings::load(cli.config.as_deref())?;
    let state = AppState::new(settings).await?;

    match cli.command {
        Commands::Device { command } => handle_device(&state, &cli.actor, command).await,
        Commands::Job { command } => handle_job(&state, &cli.actor, command).await,
        Commands::Reconcile => handle_reconcile(&state).await,
    }
}

async fn handle_device(
    state: &AppState,
    actor: &str,
    command: DeviceCommands,
) -> anyhow::Result<Value> {
    let pool = state.database.pool();

    match command {
        DeviceCommands::Add {
            name,
            ip,
            platform,
            port,
            credentials_ref,
        } => {
            let platform = PlatformKind::from_str(&platform)
                .with_context(|| format!("unknown platform {}", platform))?;
            let input = CreateDevice {
                name,
                ip,
                platform,
                port,
                credentials_ref,
            };
            let id = queries::create_device(pool, &input).await?;

            let target = format!("device:{}", id);
            queries::record_audit_event(
                pool,
                AuditRecord {
                    actor,
                    action: "create_device",
                    target: Some(&target),
                    details: Some(json!({ "name": input.name, "ip": input.ip })),
                },
            )
            .await?;

            info!(device_id = id, "Device registered");
            Ok(json!({ "id": id, "name": input.name }))
        }
        DeviceCommands::List => Ok(serde_json::to_value(queries::list_devices(pool).await?)?),
    }
}

async fn handle_job(state: &AppState, actor: &str, command: JobCommands) -> anyhow::Result<Value> {
    let pool = state.database.pool();

    match command {
        JobCommands::Create {
            device,
            name,
            command,
        } => {
            let device = match device.parse::<i64>() {
                Ok(id) => queries::find_device(pool, id).await?,
                Err(_) => queries::find_device_by_name(pool, &device).await?,
            }
            .with_context(|| format!("device {} not found", device))?;

            let id = queries::create_job(
                pool,
                &CreateJob {
                    name,
                    device_id: device.id,
                    command,
                },
            )
            .await?;

            let target = format!("job:{}", id);
            queries::record_audit_event(
                pool,
                AuditRecord {
                    actor,
                    action: "create_job",
                    target: Some(&target),
                    details: Some(json!({ "device_id": device.id })),
                },
            )
            .await?;

            Ok(json!({ "id": id, "device_id": device.id, "status": "PENDING" }))
        }
        JobCommands::Push {
            job_id,
            mut lines,
            file,
            verify,
            wait,
        } => {
            if let Some(path) = file {
                let content = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                lines.extend(
                    content
                        .lines()
                        .filter(|l| !l.trim().is_empty())
                        .map(str::to_string),
                );
            }

            let queue = SqliteTaskQueue::new(pool.clone());
            let admission = admit(
                pool,
                &queue,
                job_id,
                actor,
                PushRequest {
                    config_lines: lines,
                    verify_commands: verify,
                },
            )
            .await?;

            if !wait {
                return Ok(serde_json::to_value(&admission)?);
            }
            wait_for_job(state, job_id).await
        }
        JobCommands::Show { job_id } => {
            let job = queries::find_job(pool, job_id)
                .await?
                .with_context(|| format!("job {} not found", job_id))?;
            let attempts = queries::list_attempts(pool, job_id).await?;
            Ok(json!({ "job": job, "attempts": attempts }))
        }
        JobCommands::Logs { job_id } => {
            Ok(serde_json::to_value(queries::list_logs(pool, job_id).await?)?)
        }
    }
}

async fn wait_for_job(state: &AppState, job_id: i64) -> anyhow::Result<Value> {
    let pool = state.database.pool();
    let poll = state.settings.poll_interval().max(Duration::from_millis(100));

    loop {
        let job = queries::find_job(pool, job_id)
            .await?
            .with_context(|| format!("job {} not found", job_id))?;
        if job.status().is_some_and(|s| s.is_terminal()) {
            let logs = queries::list_logs(pool, job_id).await?;
            return Ok(json!({ "job": job, "logs": logs }));
        }
        tokio::time::sleep(poll).await;
    }
}

async fn handle_reconcile(state: &AppState) -> anyhow::Result<Value> {
    let reconciler = Reconciler::new(
        state.database.pool().clone(),
        state.settings.task_hard_timeout(),
    );
    let closed = reconciler.reconcile(Utc::now()).await?;
    Ok(json!({ "closed": closed }))
}

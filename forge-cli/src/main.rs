// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

//! Forge CLI
//!
//! Command-line harness for driving the worker orchestration core
//! directly: start and stop workers, enqueue and cancel jobs, and watch
//! the resource-metric sampler.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use forge_core::config::Config;
use forge_core::Core;
use uuid::Uuid;

mod commands;

#[derive(Parser)]
#[command(name = "forge")]
#[command(author, version, about = "Worker orchestration core CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Worker lifecycle operations
    Worker {
        #[command(subcommand)]
        action: WorkerCommands,
    },
    /// Job scheduling operations
    Job {
        #[command(subcommand)]
        action: JobCommands,
    },
    /// Resource-metric sampler operations
    Sampler {
        #[command(subcommand)]
        action: SamplerCommands,
    },
}

#[derive(Subcommand)]
enum WorkerCommands {
    /// Launch a new worker process
    Start {
        /// Human-readable worker name
        #[arg(long)]
        name: String,

        /// Directory containing the worker's runtime and entrypoint
        #[arg(long = "install-path")]
        install_path: PathBuf,

        /// Port to bind (default: first free port at or above 8188)
        #[arg(long)]
        port: Option<u16>,

        /// Flags forwarded verbatim to the worker process, e.g. `--cpu --attention split`
        #[arg(last = true)]
        raw_flags: Vec<String>,
    },
    /// Terminate a worker process
    Stop { worker_id: Uuid },
    /// Poll a worker for readiness
    Ready {
        worker_id: Uuid,

        #[arg(long)]
        attempts: Option<u32>,

        #[arg(long = "interval-ms")]
        interval_ms: Option<u64>,
    },
    /// List all known workers
    List,
    /// Print a worker's buffered stdout/stderr lines
    Logs {
        worker_id: Uuid,

        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// Enqueue a job, dispatching immediately if a worker is idle
    Enqueue {
        /// JSON payload forwarded to the worker's /prompt endpoint
        workflow_data: String,

        #[arg(long)]
        priority: Option<i64>,

        #[arg(long = "worker-id")]
        worker_id: Option<Uuid>,
    },
    /// Cancel a pending or running job
    Cancel { job_id: Uuid },
    /// List all known jobs
    List,
}

#[derive(Subcommand)]
enum SamplerCommands {
    /// Run a single sampling tick and exit
    Tick,
    /// Run the sampler timer in the foreground until interrupted
    Watch {
        #[arg(long = "interval-ms", default_value = "5000")]
        interval_ms: u64,
    },
}

fn main() -> Result<()> {
    // Load .env file if present (picks up STORAGE_URL, WORKER_*_MS, etc. in dev).
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();

    let core = Core::new(Config::from_env())?;

    match cli.command {
        Some(Commands::Worker { action }) => match action {
            WorkerCommands::Start {
                name,
                install_path,
                port,
                raw_flags,
            } => commands::worker::start(&core, name, install_path, port, raw_flags).await?,
            WorkerCommands::Stop { worker_id } => commands::worker::stop(&core, worker_id).await?,
            WorkerCommands::Ready {
                worker_id,
                attempts,
                interval_ms,
            } => commands::worker::ready(&core, worker_id, attempts, interval_ms).await?,
            WorkerCommands::List => commands::worker::list(&core)?,
            WorkerCommands::Logs { worker_id, limit } => {
                commands::worker::logs(&core, worker_id, limit)?
            }
        },
        Some(Commands::Job { action }) => match action {
            JobCommands::Enqueue {
                workflow_data,
                priority,
                worker_id,
            } => commands::job::enqueue(&core, workflow_data, priority, worker_id).await?,
            JobCommands::Cancel { job_id } => commands::job::cancel(&core, job_id).await?,
            JobCommands::List => commands::job::list(&core)?,
        },
        Some(Commands::Sampler { action }) => match action {
            SamplerCommands::Tick => commands::sampler::tick(&core)?,
            SamplerCommands::Watch { interval_ms } => {
                commands::sampler::watch(&core, interval_ms).await?
            }
        },
        None => {
            Cli::parse_from(["forge", "--help"]);
        }
    }

    Ok(())
}

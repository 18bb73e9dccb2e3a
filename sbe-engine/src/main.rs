//! sbe-engine - Sample batch engine command-line front end
//!
//! Scans a sample collection, runs a batch analysis job against the
//! configured service, and reports progress. Ctrl+C pauses the job; `resume`
//! picks it up from its last checkpoint.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sbe_common::config::{self, RateLimitConfig, TomlConfig};
use sbe_common::events::{EventBus, JobEvent, JobState};
use sbe_engine::analyzer::HttpAnalyzer;
use sbe_engine::services::JobSummary;
use sbe_engine::store::{FileCheckpointStore, SqliteCacheStore};
use sbe_engine::controller::{self, JobController, StatusReport};
use sbe_engine::EngineError;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Command-line arguments for sbe-engine
#[derive(Parser, Debug)]
#[command(name = "sbe-engine")]
#[command(about = "Rate-limited batch analysis of audio sample collections")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the cache database and job state
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan a collection and analyze every sample
    Run {
        /// Collection root directory
        root: PathBuf,

        /// Samples per external call
        #[arg(long)]
        batch_size: Option<usize>,

        /// Calls allowed per window
        #[arg(long)]
        max_calls: Option<u32>,

        /// Rolling window length in seconds
        #[arg(long)]
        window_secs: Option<u64>,
    },

    /// Continue a paused job from its checkpoint
    Resume {
        job_id: Uuid,
    },

    /// Show one job, or every job when no id is given
    Status {
        job_id: Option<Uuid>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = config::load_config(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&toml_config);
    toml_config.engine.validate().context("Invalid engine configuration")?;

    let data_dir = config::resolve_data_dir(args.data_dir.as_deref(), &toml_config);
    info!(data_dir = %data_dir.display(), "Starting sbe-engine {}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Run {
            root,
            batch_size,
            max_calls,
            window_secs,
        } => {
            let defaults = toml_config.engine.rate_limit;
            let rate_limit = RateLimitConfig {
                max_calls: max_calls.unwrap_or(defaults.max_calls),
                window_secs: window_secs.unwrap_or(defaults.window_secs),
            };
            let controller = build_controller(&toml_config, &data_dir).await?;
            let job_id = controller
                .start(&root, batch_size, Some(rate_limit))
                .await
                .with_context(|| format!("Failed to start job for {}", root.display()))?;
            println!("Started job {}", job_id);
            follow_job(&controller, job_id).await
        }
        Command::Resume { job_id } => {
            let controller = build_controller(&toml_config, &data_dir).await?;
            controller.resume(job_id).await.context("Failed to resume job")?;
            println!("Resumed job {}", job_id);
            follow_job(&controller, job_id).await
        }
        Command::Status { job_id, json } => {
            let cache = open_cache(&data_dir).await?;
            let checkpoints = FileCheckpointStore::new(&data_dir);
            let retry = &toml_config.engine.storage_retry;
            let reports = match job_id {
                Some(id) => vec![controller::stored_status(&cache, &checkpoints, retry, id).await?],
                None => controller::stored_statuses(&cache, &checkpoints, retry).await?,
            };
            cache.close().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else if reports.is_empty() {
                println!("No jobs found in {}", data_dir.display());
            } else {
                for report in &reports {
                    print_status(report);
                }
            }
            Ok(())
        }
    }
}

/// Initialize tracing; RUST_LOG overrides `logging.level`
fn init_tracing(toml_config: &TomlConfig) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| toml_config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn build_controller(toml_config: &TomlConfig, data_dir: &Path) -> Result<JobController> {
    let analyzer = HttpAnalyzer::from_config(toml_config).context("Failed to configure analyzer")?;
    let cache = open_cache(data_dir).await?;

    Ok(JobController::new(
        Arc::new(analyzer),
        Arc::new(cache),
        Arc::new(FileCheckpointStore::new(data_dir)),
        toml_config.engine.clone(),
        EventBus::new(256),
    ))
}

async fn open_cache(data_dir: &Path) -> Result<SqliteCacheStore> {
    let db_path = data_dir.join("cache.db");
    info!("Cache database: {}", db_path.display());
    SqliteCacheStore::open(&db_path)
        .await
        .context("Failed to open cache database")
}

/// Print progress until the job stops; Ctrl+C pauses it
async fn follow_job(controller: &JobController, job_id: Uuid) -> Result<()> {
    let mut events = controller.event_bus().subscribe();
    let mut waiter = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.wait(job_id).await })
    };

    let mut last_print: Option<Instant> = None;
    let mut interrupted = false;

    let outcome = loop {
        tokio::select! {
            result = &mut waiter => break result.context("Job waiter failed")?,
            _ = signal::ctrl_c(), if !interrupted => {
                info!(%job_id, "Received Ctrl+C, pausing job after the in-flight batch");
                match controller.pause(job_id).await {
                    Ok(()) => interrupted = true,
                    Err(e) => warn!(%job_id, error = %e, "Pause request failed"),
                }
            }
            event = events.recv() => match event {
                Ok(event) if event.job_id() == job_id => print_event(&event, &mut last_print),
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => warn!(missed, "Progress display fell behind"),
                Err(RecvError::Closed) => {}
            },
        }
    };

    report_outcome(job_id, outcome)
}

fn print_event(event: &JobEvent, last_print: &mut Option<Instant>) {
    match event {
        JobEvent::ProgressUpdated { progress, .. } => {
            // At most one progress line per second
            let due = last_print.map_or(true, |t| t.elapsed() >= Duration::from_secs(1));
            if due || progress.processed == progress.total {
                *last_print = Some(Instant::now());
                println!("  {}", progress.display_string());
            }
        }
        JobEvent::BatchRetryScheduled {
            sequence,
            attempt,
            delay_ms,
            reason,
            ..
        } => println!(
            "  batch {} retry #{} in {}s ({})",
            sequence,
            attempt,
            delay_ms / 1000,
            reason
        ),
        JobEvent::JobStateChanged { new_state, reason, .. } => match reason {
            Some(reason) => println!("  job {}: {}", new_state, reason),
            None => println!("  job {}", new_state),
        },
        _ => {}
    }
}

fn report_outcome(job_id: Uuid, outcome: Result<JobSummary, EngineError>) -> Result<()> {
    match outcome {
        Ok(summary) => {
            println!(
                "Job {} {} after {} calls: {}",
                job_id,
                summary.state,
                summary.calls_made,
                summary.progress.display_string()
            );
            if summary.state == JobState::Paused {
                println!("Resume with: sbe-engine resume {}", job_id);
            }
            Ok(())
        }
        Err(e @ EngineError::Aborted { .. }) => Err(anyhow::Error::new(e).context("Job aborted")),
        Err(e) => Err(anyhow::Error::new(e).context("Job failed")),
    }
}

fn print_status(report: &StatusReport) {
    println!("{}  {}  {}", report.job_id, report.state, report.collection_root.display());
    println!("    {}", report.progress.display_string());
    if let Some(reason) = &report.last_error {
        println!("    last error: {}", reason);
    }
    if report.running {
        println!("    running in this process");
    }
}

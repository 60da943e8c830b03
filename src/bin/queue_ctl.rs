use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use assembly_runner::config::{self, Config};
use assembly_runner::controller::JobController;
use assembly_runner::db::{self, Pool};
use assembly_runner::intake::{self, BuildRow, FinishedGoodSelection};
use assembly_runner::model::{OperationType, Selection, TriggeredBy};
use assembly_runner::remote::{RemoteClient, RemoteService};
use assembly_runner::session::SessionManager;

#[derive(Debug, Parser)]
#[command(author, version, about = "Inspect and operate the assembly queue")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print queue counts by status
    Status,
    /// Process ready items in the foreground and exit when done
    Run {
        /// Only process one operation type (build or disassemble)
        #[arg(long)]
        operation: Option<String>,
    },
    /// Queue builds from a JSON array of rows
    EnqueueBuilds { file: PathBuf },
    /// Queue disassemblies from a JSON array of finished-good selections
    EnqueueDisassemblies { file: PathBuf },
    /// Reverse open parent orders and drop all pending items
    Clear,
    /// Close one parent order short and mark its pending items
    CloseShort { parent_order: String },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))
}

async fn with_remote<T, F, Fut>(pool: &Pool, cfg: &Config, f: F) -> Result<T>
where
    F: FnOnce(Arc<dyn RemoteService>, Arc<SessionManager>) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let remote: Arc<dyn RemoteService> = Arc::new(RemoteClient::from_config(cfg)?);
    let session = Arc::new(SessionManager::new(pool.clone(), Arc::clone(&remote)));
    let logged_in = session.ensure_service(&cfg.service_credentials()).await?;

    let result = f(remote, Arc::clone(&session)).await;

    if logged_in {
        if let Err(err) = session.logout().await {
            warn!(?err, "logout failed");
        }
    }
    result
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    match args.command {
        Command::Status => {
            let counts = db::count_by_status(&pool, chrono::Utc::now()).await?;
            print_json(&counts)?;
        }
        Command::Run { operation } => {
            let operation_type = match operation.as_deref() {
                Some(raw) => Some(
                    OperationType::parse(raw)
                        .with_context(|| format!("unknown operation type {}", raw))?,
                ),
                None => None,
            };
            let selection = Selection {
                operation_type,
                scheduled_only: false,
            };
            let settings = cfg.queue.clone();
            let job_pool = pool.clone();
            let snapshot = with_remote(&pool, &cfg, |remote, session| async move {
                let controller = Arc::new(JobController::new(job_pool, remote, session, settings));
                controller
                    .run_to_end(TriggeredBy::Interactive, selection)
                    .await
            })
            .await?;
            info!(state = %snapshot.state, "run finished");
            print_json(&snapshot)?;
        }
        Command::EnqueueBuilds { file } => {
            let rows: Vec<BuildRow> = read_json(&file)?;
            let report = intake::enqueue_builds(&pool, rows).await?;
            print_json(&report)?;
        }
        Command::EnqueueDisassemblies { file } => {
            let selections: Vec<FinishedGoodSelection> = read_json(&file)?;
            let intake_pool = pool.clone();
            let report = with_remote(&pool, &cfg, |remote, _| async move {
                intake::enqueue_disassemblies(&intake_pool, remote.as_ref(), selections).await
            })
            .await?;
            print_json(&report)?;
        }
        Command::Clear => {
            let settings = cfg.queue.clone();
            let job_pool = pool.clone();
            let report = with_remote(&pool, &cfg, |remote, session| async move {
                JobController::new(job_pool, remote, session, settings)
                    .clear()
                    .await
            })
            .await?;
            print_json(&report)?;
        }
        Command::CloseShort { parent_order } => {
            let settings = cfg.queue.clone();
            let job_pool = pool.clone();
            let number = parent_order.clone();
            let closed = with_remote(&pool, &cfg, |remote, session| async move {
                JobController::new(job_pool, remote, session, settings)
                    .close_short(&number)
                    .await
            })
            .await?;
            println!("{} item(s) closed short in {}", closed, parent_order);
        }
    }

    pool.close().await;
    Ok(())
}

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use assembly_runner::config;
use assembly_runner::controller::JobController;
use assembly_runner::db;
use assembly_runner::remote::{RemoteClient, RemoteService};
use assembly_runner::scheduler::Scheduler;
use assembly_runner::session::SessionManager;
use assembly_runner::shutdown;

#[derive(Debug, Parser)]
#[command(author, version, about = "Run queued assembly work against the remote ERP")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
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

    let remote: Arc<dyn RemoteService> = Arc::new(RemoteClient::from_config(&cfg)?);
    let session = Arc::new(SessionManager::new(pool.clone(), Arc::clone(&remote)));
    if !session.restore().await? {
        info!("no cached remote session");
    }

    let controller = Arc::new(JobController::new(
        pool.clone(),
        remote,
        session,
        cfg.queue.clone(),
    ));

    let (scheduler_stop, scheduler_rx) = watch::channel(false);
    let scheduler_task = if cfg.scheduler.enabled {
        let scheduler = Scheduler::new(
            Arc::clone(&controller),
            cfg.service_credentials(),
            cfg.scheduler_interval(),
        );
        Some(tokio::spawn(scheduler.run(scheduler_rx)))
    } else {
        warn!("scheduler disabled");
        None
    };

    let counts = db::count_by_status(&pool, chrono::Utc::now()).await?;
    info!(
        pending = counts.pending,
        deferred = counts.deferred,
        failed = counts.failed,
        "assembly runner started"
    );

    tokio::select! {
        _ = shutdown::shutdown_signal() => info!("shutdown signal received"),
        _ = controller.wait_for_fatal() => {
            error!(error = ?controller.status().error, "job failed; shutting down");
        }
    }

    shutdown::graceful_shutdown(
        controller.tracker(),
        scheduler_stop,
        scheduler_task,
        &pool,
        cfg.drain_timeout(),
        cfg.drain_poll_interval(),
    )
    .await;
    Ok(())
}

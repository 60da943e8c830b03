//! Graceful termination: let the current item finish, then tear down.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::db::Pool;
use crate::job::{JobState, JobTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// No job was running.
    Idle,
    /// The running job reached this state before the deadline.
    Drained(JobState),
    /// The job was still running at the deadline.
    TimedOut,
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(?err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(?err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Request a stop and poll until the job leaves `Running` or `timeout` passes.
///
/// Nothing is cancelled on timeout; an item still in flight may leave its
/// remote transaction half done, which the next run resumes.
pub async fn drain(tracker: &JobTracker, timeout: Duration, poll: Duration) -> DrainOutcome {
    if tracker.state() != JobState::Running {
        return DrainOutcome::Idle;
    }
    if tracker.request_stop().is_err() {
        // Finished between the check and the request.
        return DrainOutcome::Drained(tracker.state());
    }
    info!(timeout_secs = timeout.as_secs(), "draining running job");

    let deadline = Instant::now() + timeout;
    loop {
        let state = tracker.state();
        if state != JobState::Running {
            info!(%state, "job drained");
            return DrainOutcome::Drained(state);
        }
        let now = Instant::now();
        if now >= deadline {
            warn!("drain timed out; an in-flight remote transaction may be incomplete");
            return DrainOutcome::TimedOut;
        }
        tokio::time::sleep(poll.min(deadline - now)).await;
    }
}

/// Stop the scheduler, drain the job and close the store. The cached remote
/// session is left in place for the next process.
///
/// The scheduler goes first so a tick caught mid-login cannot launch a job
/// after the drain has looked.
pub async fn graceful_shutdown(
    tracker: &JobTracker,
    scheduler_stop: watch::Sender<bool>,
    scheduler_task: Option<JoinHandle<()>>,
    pool: &Pool,
    drain_timeout: Duration,
    poll: Duration,
) -> DrainOutcome {
    let _ = scheduler_stop.send(true);
    if let Some(mut task) = scheduler_task {
        if tokio::time::timeout(drain_timeout, &mut task).await.is_err() {
            // A launched job is its own task; aborting the loop only drops a pending tick.
            warn!("scheduler did not stop in time; aborting it");
            task.abort();
            let _ = task.await;
        }
    }

    let outcome = drain(tracker, drain_timeout, poll).await;

    pool.close().await;
    info!(?outcome, "shutdown complete");
    outcome
}

//! Periodic unattended runs over deferred queue items.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::controller::JobController;
use crate::db;
use crate::job::JobState;
use crate::model::{Selection, TriggeredBy};
use crate::session::{Credentials, SessionKind};

#[derive(Debug)]
pub enum TickOutcome {
    /// A job was already running.
    Busy,
    /// An operator is logged in; unattended work waits.
    InteractiveSession,
    NothingDue,
    /// Resolves after the job has finished and the service session is closed.
    Launched(JoinHandle<()>),
}

/// Time from `now` to the next multiple of `interval` since the Unix epoch.
pub fn delay_until_next_boundary(now: DateTime<Utc>, interval: Duration) -> Duration {
    let period = (interval.as_millis() as i64).max(1);
    let now_ms = now.timestamp_millis();
    let next = (now_ms.div_euclid(period) + 1) * period;
    Duration::from_millis((next - now_ms) as u64)
}

pub struct Scheduler {
    controller: Arc<JobController>,
    credentials: Credentials,
    interval: Duration,
}

impl Scheduler {
    pub fn new(controller: Arc<JobController>, credentials: Credentials, interval: Duration) -> Self {
        Self {
            controller,
            credentials,
            interval,
        }
    }

    /// One scheduling decision. Nothing is launched while a job runs or an
    /// interactive session is open.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        if self.controller.status().state == JobState::Running {
            debug!("job already running; skipping tick");
            return Ok(TickOutcome::Busy);
        }
        let session = Arc::clone(self.controller.session());
        if session.interactive_active() {
            debug!("interactive session active; skipping tick");
            return Ok(TickOutcome::InteractiveSession);
        }
        let due = db::count_due_scheduled(self.controller.pool(), now).await?;
        if due == 0 {
            return Ok(TickOutcome::NothingDue);
        }

        info!(due, "launching scheduled run");
        session.login(&self.credentials, SessionKind::Service).await?;
        let handle = match self
            .controller
            .launch(TriggeredBy::Scheduler, Selection::scheduled())
        {
            Ok(handle) => handle,
            Err(err) => {
                // Lost the race to an interactive start.
                info!(?err, "scheduled run not started");
                if let Err(err) = session.logout().await {
                    warn!(?err, "service logout failed");
                }
                return Ok(TickOutcome::Busy);
            }
        };

        Ok(TickOutcome::Launched(tokio::spawn(async move {
            match handle.await {
                Ok(snapshot) => info!(
                    state = %snapshot.state,
                    processed = snapshot.processed_items,
                    failed = snapshot.failed_items,
                    "scheduled run finished"
                ),
                Err(err) => error!(?err, "scheduled run panicked"),
            }
            if let Err(err) = session.logout().await {
                warn!(?err, "service logout failed");
            }
        })))
    }

    /// Tick on interval boundaries until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "scheduler started");
        loop {
            let delay = delay_until_next_boundary(Utc::now(), self.interval);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            match self.tick(Utc::now()).await {
                Ok(outcome) => debug!(?outcome, "scheduler tick"),
                Err(err) => error!(?err, "scheduler tick failed"),
            }
        }
        info!("scheduler stopped");
    }
}

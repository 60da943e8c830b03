//! Entry points for starting, stopping and inspecting the single job, plus the
//! operator's queue maintenance actions.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::config;
use crate::db::{self, Pool};
use crate::error::JobError;
use crate::job::{JobSnapshot, JobState, JobTracker};
use crate::model::{Selection, TriggeredBy};
use crate::orchestrator::{Orchestrator, RunOutcome};
use crate::remote::model::status;
use crate::remote::{queries, RemoteService};
use crate::session::SessionManager;

/// What `clear` managed to undo.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub deleted_orders: Vec<String>,
    pub closed_orders: Vec<String>,
    pub deleted_items: u64,
    /// Parent orders whose reversal failed; their rows were kept.
    pub failures: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reversal {
    Deleted,
    ClosedShort,
    Absent,
}

pub struct JobController {
    pool: Pool,
    remote: Arc<dyn RemoteService>,
    tracker: Arc<JobTracker>,
    session: Arc<SessionManager>,
    orchestrator: Orchestrator,
}

impl JobController {
    pub fn new(
        pool: Pool,
        remote: Arc<dyn RemoteService>,
        session: Arc<SessionManager>,
        settings: config::Queue,
    ) -> Self {
        let tracker = Arc::new(JobTracker::new());
        let orchestrator = Orchestrator::new(
            pool.clone(),
            Arc::clone(&remote),
            Arc::clone(&tracker),
            settings,
        );
        Self {
            pool,
            remote,
            tracker,
            session,
            orchestrator,
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn status(&self) -> JobSnapshot {
        self.tracker.snapshot()
    }

    /// Claim the job slot and run the orchestrator in the background.
    ///
    /// The claim happens before this returns, so a second caller is rejected
    /// with [`JobError::AlreadyRunning`] even if the task has not been polled yet.
    pub fn launch(
        self: &Arc<Self>,
        triggered_by: TriggeredBy,
        selection: Selection,
    ) -> Result<JoinHandle<JobSnapshot>, JobError> {
        self.tracker.begin(triggered_by)?;
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move { this.drive(selection).await }))
    }

    pub fn start(self: &Arc<Self>, selection: Selection) -> Result<JoinHandle<JobSnapshot>, JobError> {
        self.launch(TriggeredBy::Interactive, selection)
    }

    /// Launch and wait for the terminal snapshot.
    pub async fn run_to_end(
        self: &Arc<Self>,
        triggered_by: TriggeredBy,
        selection: Selection,
    ) -> Result<JobSnapshot> {
        let handle = self.launch(triggered_by, selection)?;
        handle.await.context("job task panicked")
    }

    async fn drive(&self, selection: Selection) -> JobSnapshot {
        let (state, message) = match self.orchestrator.run(&selection).await {
            Ok(RunOutcome::Completed) => (JobState::Completed, None),
            Ok(RunOutcome::Stopped) => (JobState::Stopped, None),
            Err(err) => {
                error!(error = ?err, "job aborted");
                (JobState::Error, Some(format!("{:#}", err)))
            }
        };
        if let Err(err) = self.tracker.finish(state, message) {
            warn!(?err, "job finished from an unexpected state");
        }
        self.tracker.snapshot()
    }

    pub fn stop(&self) -> Result<(), JobError> {
        self.tracker.request_stop()
    }

    pub fn reset(&self) -> Result<(), JobError> {
        self.tracker.reset()
    }

    /// Resolves once the job enters `Error`.
    pub async fn wait_for_fatal(&self) {
        let mut rx = self.tracker.subscribe();
        loop {
            if rx.borrow_and_update().state == JobState::Error {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Undo remote work for every open batch and drop all pending rows.
    ///
    /// Parent orders that were never issued are deleted; issued ones are
    /// closed short. A batch whose reversal fails keeps its rows so the
    /// operator can retry.
    #[instrument(skip_all)]
    pub async fn clear(&self) -> Result<ClearReport> {
        if self.tracker.state() == JobState::Running {
            return Err(JobError::AlreadyRunning.into());
        }
        let mut report = ClearReport::default();

        for number in db::open_parent_orders(&self.pool).await? {
            match self.reverse_parent_order(&number).await {
                Ok(reversal) => {
                    report.deleted_items += db::delete_pending_for_parent(&self.pool, &number).await?;
                    match reversal {
                        Reversal::Deleted => report.deleted_orders.push(number),
                        Reversal::ClosedShort => report.closed_orders.push(number),
                        Reversal::Absent => {}
                    }
                }
                Err(err) => {
                    warn!(parent_order = %number, error = %err, "could not reverse parent order");
                    report.failures.push((number, format!("{:#}", err)));
                }
            }
        }
        report.deleted_items += db::delete_pending_unassigned(&self.pool).await?;
        self.tracker.reset()?;

        info!(
            deleted_items = report.deleted_items,
            failures = report.failures.len(),
            "queue cleared"
        );
        Ok(report)
    }

    async fn reverse_parent_order(&self, number: &str) -> Result<Reversal> {
        let Some(row) = queries::parent_order_by_number(self.remote.as_ref(), number).await? else {
            return Ok(Reversal::Absent);
        };
        if row.status < status::PARENT_ISSUED {
            self.remote.delete_parent_order(row.id).await?;
            Ok(Reversal::Deleted)
        } else {
            self.remote.close_short_parent_order(row.id).await?;
            Ok(Reversal::ClosedShort)
        }
    }

    /// Close a parent order short remotely and mark its pending items `closed_short`.
    #[instrument(skip_all, fields(parent_order = %number))]
    pub async fn close_short(&self, number: &str) -> Result<u64> {
        if self.tracker.state() == JobState::Running {
            return Err(JobError::AlreadyRunning.into());
        }
        let row = queries::parent_order_by_number(self.remote.as_ref(), number)
            .await?
            .with_context(|| format!("parent order {} not found remotely", number))?;
        self.remote.close_short_parent_order(row.id).await?;
        let closed = db::mark_closed_short(&self.pool, number, "closed short by operator").await?;
        info!(closed, "parent order closed short");
        Ok(closed)
    }
}

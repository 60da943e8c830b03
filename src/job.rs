//! The process-wide job descriptor.
//!
//! A single [`JobTracker`] owns the live state of the one job a process may
//! run. Writers go through its transition methods; readers take cheap
//! snapshots from a `watch` channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use crate::error::JobError;
use crate::model::TriggeredBy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
    Stopped,
    Completed,
    Error,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Completed | Self::Error)
    }

    /// `Running` may only be entered from a non-running state and may only
    /// leave to a terminal one; every terminal state can return to `Idle`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Running, Running) => false,
            (_, Running) => true,
            (Running, Stopped | Completed | Error) => true,
            (Idle | Stopped | Completed | Error, Idle) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Immutable view of the job handed to pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub run_id: Option<Uuid>,
    pub state: JobState,
    pub triggered_by: Option<TriggeredBy>,
    pub total_items: usize,
    pub processed_items: usize,
    pub success_items: usize,
    pub failed_items: usize,
    pub current_batch: usize,
    pub total_batches: usize,
    pub current_parent_order: Option<String>,
    pub current_sub_order: Option<String>,
    pub stop_requested: bool,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for JobSnapshot {
    fn default() -> Self {
        Self {
            run_id: None,
            state: JobState::Idle,
            triggered_by: None,
            total_items: 0,
            processed_items: 0,
            success_items: 0,
            failed_items: 0,
            current_batch: 0,
            total_batches: 0,
            current_parent_order: None,
            current_sub_order: None,
            stop_requested: false,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

#[derive(Debug)]
pub struct JobTracker {
    tx: watch::Sender<JobSnapshot>,
    stop: AtomicBool,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(JobSnapshot::default());
        Self {
            tx,
            stop: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.tx.borrow().clone()
    }

    pub fn state(&self) -> JobState {
        self.tx.borrow().state
    }

    pub fn subscribe(&self) -> watch::Receiver<JobSnapshot> {
        self.tx.subscribe()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Enter `Running`. The check and the write happen under the channel lock,
    /// so two callers can never both succeed.
    pub fn begin(&self, triggered_by: TriggeredBy) -> Result<Uuid, JobError> {
        let run_id = Uuid::new_v4();
        let mut rejected = None;
        self.tx.send_if_modified(|snap| {
            if !snap.state.can_transition_to(JobState::Running) {
                rejected = Some(snap.state);
                return false;
            }
            *snap = JobSnapshot {
                run_id: Some(run_id),
                state: JobState::Running,
                triggered_by: Some(triggered_by),
                started_at: Some(Utc::now()),
                ..JobSnapshot::default()
            };
            true
        });
        if let Some(state) = rejected {
            return Err(if state == JobState::Running {
                JobError::AlreadyRunning
            } else {
                JobError::InvalidTransition {
                    from: state,
                    to: JobState::Running,
                }
            });
        }
        self.stop.store(false, Ordering::SeqCst);
        info!(%run_id, ?triggered_by, "job started");
        Ok(run_id)
    }

    /// Ask the running job to stop at the next item boundary.
    pub fn request_stop(&self) -> Result<(), JobError> {
        let mut running = false;
        self.tx.send_if_modified(|snap| {
            running = snap.state == JobState::Running;
            if running && !snap.stop_requested {
                snap.stop_requested = true;
                return true;
            }
            false
        });
        if !running {
            return Err(JobError::NotRunning);
        }
        self.stop.store(true, Ordering::SeqCst);
        info!("stop requested");
        Ok(())
    }

    pub fn set_totals(&self, total_items: usize, total_batches: usize) {
        self.tx.send_modify(|snap| {
            snap.total_items = total_items;
            snap.total_batches = total_batches;
        });
    }

    pub fn enter_batch(&self, index: usize, parent_order: &str) {
        self.tx.send_modify(|snap| {
            snap.current_batch = index;
            snap.current_parent_order = Some(parent_order.to_string());
            snap.current_sub_order = None;
        });
    }

    pub fn set_current_sub_order(&self, sub_order: &str) {
        self.tx.send_modify(|snap| {
            snap.current_sub_order = Some(sub_order.to_string());
        });
    }

    pub fn record_outcome(&self, success: bool) {
        self.tx.send_modify(|snap| {
            snap.processed_items += 1;
            if success {
                snap.success_items += 1;
            } else {
                snap.failed_items += 1;
            }
        });
    }

    /// Leave `Running` for a terminal state.
    pub fn finish(&self, state: JobState, error: Option<String>) -> Result<(), JobError> {
        let mut rejected = None;
        self.tx.send_if_modified(|snap| {
            if snap.state != JobState::Running || !state.is_terminal() {
                rejected = Some(snap.state);
                return false;
            }
            snap.state = state;
            snap.error = error.clone();
            snap.finished_at = Some(Utc::now());
            snap.current_sub_order = None;
            if state == JobState::Stopped {
                snap.stop_requested = false;
            }
            true
        });
        if let Some(from) = rejected {
            return Err(JobError::InvalidTransition { from, to: state });
        }
        if state == JobState::Stopped {
            self.stop.store(false, Ordering::SeqCst);
        }
        info!(%state, error = error.as_deref().unwrap_or(""), "job finished");
        Ok(())
    }

    /// Return a finished job to `Idle`.
    pub fn reset(&self) -> Result<(), JobError> {
        let mut rejected = None;
        self.tx.send_if_modified(|snap| {
            if !snap.state.can_transition_to(JobState::Idle) {
                rejected = Some(snap.state);
                return false;
            }
            *snap = JobSnapshot::default();
            true
        });
        if let Some(from) = rejected {
            return Err(if from == JobState::Running {
                JobError::AlreadyRunning
            } else {
                JobError::InvalidTransition {
                    from,
                    to: JobState::Idle,
                }
            });
        }
        self.stop.store(false, Ordering::SeqCst);
        Ok(())
    }
}

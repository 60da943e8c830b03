use thiserror::Error;

use crate::job::JobState;

/// Failure of a single remote call. No call is retried at this level.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to reach remote system during {operation}: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("remote error {status} during {operation}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("invalid response from {operation}: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{operation}: {what} not found")]
    NotFound {
        operation: &'static str,
        what: String,
    },
    #[error("not logged in to the remote system")]
    NotAuthenticated,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RemoteError {
    /// Rejections of the request itself, as opposed to transport or server trouble.
    pub fn is_validation(&self) -> bool {
        match self {
            RemoteError::Status { status, .. } => matches!(status, 400 | 422),
            RemoteError::InvalidRequest(_) => true,
            _ => false,
        }
    }
}

/// Rejections raised by the job state machine and control surface.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("a job is already running")]
    AlreadyRunning,
    #[error("no job is running")]
    NotRunning,
    #[error("invalid job transition from {from} to {to}")]
    InvalidTransition { from: JobState, to: JobState },
}

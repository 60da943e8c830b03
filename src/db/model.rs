//! View models returned by aggregate queries.

use serde::Serialize;

use crate::model::ItemStatus;

/// Row count for one status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: ItemStatus,
    pub count: i64,
}

/// Queue totals by status, as reported to operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: i64,
    pub success: i64,
    pub failed: i64,
    pub closed_short: i64,
    /// Pending items deferred to a future `scheduled_for`.
    pub deferred: i64,
}

impl QueueCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.success + self.failed + self.closed_short
    }

    pub fn add(&mut self, entry: &StatusCount) {
        match entry.status {
            ItemStatus::Pending => self.pending += entry.count,
            ItemStatus::Success => self.success += entry.count,
            ItemStatus::Failed => self.failed += entry.count,
            ItemStatus::ClosedShort => self.closed_short += entry.count,
        }
    }
}

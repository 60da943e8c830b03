use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Build,
    Disassemble,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Build => "build",
            OperationType::Disassemble => "disassemble",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "build" => Some(OperationType::Build),
            "disassemble" => Some(OperationType::Disassemble),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Success,
    Failed,
    ClosedShort,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Success => "success",
            ItemStatus::Failed => "failed",
            ItemStatus::ClosedShort => "closed_short",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ItemStatus::Pending),
            "success" => Some(ItemStatus::Success),
            "failed" => Some(ItemStatus::Failed),
            "closed_short" => Some(ItemStatus::ClosedShort),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ItemStatus::Pending)
    }
}

/// One component of a previously built unit, captured so the build can be
/// reversed after the components stop being separately trackable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BomComponent {
    pub part_id: i64,
    pub quantity: f64,
    pub serial_numbers: Vec<String>,
}

/// A queue row as persisted in `queue_items`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueItem {
    pub id: i64,
    pub operation_type: OperationType,
    pub barcode: String,
    pub serial_numbers: Vec<String>,
    pub bom_snapshot: Option<Vec<BomComponent>>,
    /// Destination for builds, source for disassemblies.
    pub location_id: i64,
    pub part_id: i64,
    pub part_number: String,
    pub bom_id: i64,
    pub bom_number: String,
    pub status: ItemStatus,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub parent_order_number: Option<String>,
    pub sub_order_number: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Validated input accepted into the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewQueueItem {
    pub operation_type: OperationType,
    pub barcode: String,
    pub serial_numbers: Vec<String>,
    pub bom_snapshot: Option<Vec<BomComponent>>,
    pub location_id: i64,
    pub part_id: i64,
    pub part_number: String,
    pub bom_id: i64,
    pub bom_number: String,
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// Criteria a job uses to pick ready queue items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub operation_type: Option<OperationType>,
    /// Only items carrying a due `scheduled_for` (unattended runs).
    pub scheduled_only: bool,
}

impl Selection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn scheduled() -> Self {
        Self {
            operation_type: None,
            scheduled_only: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    Interactive,
    Scheduler,
}

//! Typed shapes of the remote transaction objects this system mutates.
//!
//! Only the fields the runner reads or writes are named; everything else the
//! remote system sends is kept in `extra` and written back untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Remote status codes the runner branches on.
pub mod status {
    pub const PARENT_ENTERED: i64 = 10;
    pub const PARENT_ISSUED: i64 = 20;

    pub const PICK_ENTERED: i64 = 10;
    pub const PICK_STARTED: i64 = 20;

    pub const SUB_ORDER_ENTERED: i64 = 10;
    pub const SUB_ORDER_FULFILLED: i64 = 40;
}

pub const SERIAL_TRACKING: &str = "Serial Number";

/// Serial tracking attached to a pick or sub-order line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tracking {
    pub tracking_type: String,
    pub serial_numbers: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Tracking {
    pub fn serials(serial_numbers: Vec<String>) -> Self {
        Self {
            tracking_type: SERIAL_TRACKING.to_string(),
            serial_numbers,
            extra: Map::new(),
        }
    }
}

/// Request body for a new parent order covering one batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewParentOrder {
    pub number: String,
    pub bom_id: i64,
    pub quantity: f64,
    pub location_id: i64,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParentOrder {
    pub id: i64,
    pub number: String,
    pub status: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The intermediate "pick" transaction allocating components to a sub-order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pick {
    pub id: i64,
    pub number: String,
    pub status: i64,
    pub work_order_id: i64,
    #[serde(default)]
    pub items: Vec<PickLine>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Pick {
    /// A pick whose first line carries serial tracking has already been split.
    pub fn is_split(&self) -> bool {
        self.items
            .first()
            .map(|line| line.tracking.iter().any(|t| !t.serial_numbers.is_empty()))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PickLine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub part_id: i64,
    pub quantity: f64,
    #[serde(default)]
    pub location_id: Option<i64>,
    #[serde(default)]
    pub tracking: Vec<Tracking>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A generated work order, one per queue item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubOrder {
    pub id: i64,
    pub number: String,
    pub status: i64,
    #[serde(default)]
    pub location_id: Option<i64>,
    #[serde(default)]
    pub items: Vec<SubOrderLine>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubOrderLine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub part_id: i64,
    pub quantity: f64,
    #[serde(default)]
    pub tracking: Vec<Tracking>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Identity of a generated sub-order as resolved from the remote query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubOrderRef {
    pub id: i64,
    #[serde(rename = "num")]
    pub number: String,
}

/// Lookup row for a parent order by number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParentOrderRow {
    pub id: i64,
    #[serde(rename = "num")]
    pub number: String,
    pub status: i64,
}

/// Where a serialised unit currently sits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SerialLocation {
    pub serial: String,
    pub part_id: i64,
    pub location_id: i64,
}

/// Which part a serial number was recorded against, wherever it sits now.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SerialPart {
    pub serial: String,
    pub part_id: i64,
}

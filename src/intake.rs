//! Validation and de-duplication of work submitted to the queue.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, instrument};

use crate::db::{self, Pool};
use crate::error::RemoteError;
use crate::model::{BomComponent, NewQueueItem, OperationType, QueueItem};
use crate::remote::{queries, RemoteService};

/// A finished good to assemble from serialised components.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildRow {
    pub barcode: String,
    pub serial_numbers: Vec<String>,
    pub location_id: i64,
    pub part_id: i64,
    pub part_number: String,
    pub bom_id: i64,
    pub bom_number: String,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// A previously built unit chosen for disassembly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinishedGoodSelection {
    pub barcode: String,
    /// Where the unit sits now; components are returned here.
    pub location_id: i64,
    pub bom_id: i64,
    pub bom_number: String,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    /// Position in the submission.
    pub index: usize,
    pub barcode: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnqueueReport {
    pub inserted: Vec<i64>,
    pub rejected: Vec<Rejection>,
}

/// Filters barcodes repeated in the submission or already pending in the queue.
struct DuplicateFilter {
    pending: HashSet<String>,
    seen: HashSet<String>,
}

impl DuplicateFilter {
    async fn load(pool: &Pool, barcodes: Vec<String>) -> Result<Self> {
        Ok(Self {
            pending: db::pending_barcodes(pool, &barcodes).await?,
            seen: HashSet::new(),
        })
    }

    fn check(&mut self, barcode: &str) -> Option<&'static str> {
        if self.pending.contains(barcode) {
            return Some("barcode already queued");
        }
        if !self.seen.insert(barcode.to_string()) {
            return Some("duplicate barcode in submission");
        }
        None
    }
}

fn reject(report: &mut EnqueueReport, index: usize, barcode: &str, reason: impl Into<String>) {
    report.rejected.push(Rejection {
        index,
        barcode: barcode.to_string(),
        reason: reason.into(),
    });
}

#[instrument(skip_all, fields(rows = rows.len()))]
pub async fn enqueue_builds(pool: &Pool, rows: Vec<BuildRow>) -> Result<EnqueueReport> {
    let mut report = EnqueueReport::default();
    let barcodes = rows.iter().map(|r| r.barcode.trim().to_string()).collect();
    let mut duplicates = DuplicateFilter::load(pool, barcodes).await?;
    let mut accepted = Vec::new();

    for (index, row) in rows.into_iter().enumerate() {
        let barcode = row.barcode.trim().to_string();
        if barcode.is_empty() {
            reject(&mut report, index, &barcode, "barcode is empty");
            continue;
        }
        let serial_numbers: Vec<String> = row
            .serial_numbers
            .iter()
            .map(|s| s.trim().to_string())
            .collect();
        if serial_numbers.is_empty() || serial_numbers.iter().any(String::is_empty) {
            reject(&mut report, index, &barcode, "component serial numbers are missing");
            continue;
        }
        if let Some(reason) = duplicates.check(&barcode) {
            reject(&mut report, index, &barcode, reason);
            continue;
        }
        accepted.push(NewQueueItem {
            operation_type: OperationType::Build,
            barcode,
            serial_numbers,
            bom_snapshot: None,
            location_id: row.location_id,
            part_id: row.part_id,
            part_number: row.part_number,
            bom_id: row.bom_id,
            bom_number: row.bom_number,
            scheduled_for: row.scheduled_for,
        });
    }

    report.inserted = db::insert_items(pool, &accepted).await?;
    info!(
        inserted = report.inserted.len(),
        rejected = report.rejected.len(),
        "build rows enqueued"
    );
    Ok(report)
}

/// Queue disassemblies, capturing each unit's components from its last
/// successful build while they can still be resolved.
#[instrument(skip_all, fields(rows = selections.len()))]
pub async fn enqueue_disassemblies(
    pool: &Pool,
    remote: &dyn RemoteService,
    selections: Vec<FinishedGoodSelection>,
) -> Result<EnqueueReport> {
    let mut report = EnqueueReport::default();
    let barcodes = selections
        .iter()
        .map(|s| s.barcode.trim().to_string())
        .collect();
    let mut duplicates = DuplicateFilter::load(pool, barcodes).await?;
    let mut accepted = Vec::new();

    for (index, selection) in selections.into_iter().enumerate() {
        let barcode = selection.barcode.trim().to_string();
        if barcode.is_empty() {
            reject(&mut report, index, &barcode, "barcode is empty");
            continue;
        }
        if let Some(reason) = duplicates.check(&barcode) {
            reject(&mut report, index, &barcode, reason);
            continue;
        }
        let Some(build) = db::latest_successful_build(pool, &barcode).await? else {
            reject(&mut report, index, &barcode, "no completed build for barcode");
            continue;
        };
        let snapshot = match capture_snapshot(remote, &build).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                reject(
                    &mut report,
                    index,
                    &barcode,
                    format!("component snapshot unavailable: {}", err),
                );
                continue;
            }
        };
        accepted.push(NewQueueItem {
            operation_type: OperationType::Disassemble,
            barcode,
            serial_numbers: build.serial_numbers.clone(),
            bom_snapshot: Some(snapshot),
            location_id: selection.location_id,
            part_id: build.part_id,
            part_number: build.part_number,
            bom_id: selection.bom_id,
            bom_number: selection.bom_number,
            scheduled_for: selection.scheduled_for,
        });
    }

    report.inserted = db::insert_items(pool, &accepted).await?;
    info!(
        inserted = report.inserted.len(),
        rejected = report.rejected.len(),
        "disassembly rows enqueued"
    );
    Ok(report)
}

/// Group the build's component serials by part, in first-seen order.
pub async fn capture_snapshot(
    remote: &dyn RemoteService,
    build: &QueueItem,
) -> Result<Vec<BomComponent>, RemoteError> {
    let parts = queries::serial_parts(remote, &build.serial_numbers).await?;
    let by_serial: BTreeMap<&str, i64> = parts
        .iter()
        .map(|p| (p.serial.as_str(), p.part_id))
        .collect();

    let mut components: Vec<BomComponent> = Vec::new();
    for serial in &build.serial_numbers {
        let part_id = *by_serial.get(serial.as_str()).ok_or_else(|| {
            RemoteError::NotFound {
                operation: "serial_parts",
                what: format!("serial {}", serial),
            }
        })?;
        match components.iter_mut().find(|c| c.part_id == part_id) {
            Some(component) => {
                component.quantity += 1.0;
                component.serial_numbers.push(serial.clone());
            }
            None => components.push(BomComponent {
                part_id,
                quantity: 1.0,
                serial_numbers: vec![serial.clone()],
            }),
        }
    }
    Ok(components)
}

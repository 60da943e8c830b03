//! Drives one queue item through the remote pick/complete sequence.
//!
//! The remote system has no rollback, so every run starts by reading where the
//! sub-order and its pick currently stand ([`UnitProgress`]) and resumes from
//! there. Re-running a unit that crashed halfway never repeats a finished step.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::error::RemoteError;
use crate::model::{BomComponent, OperationType, QueueItem};
use crate::remote::model::{status, Pick, PickLine, SubOrder, SubOrderRef, Tracking};
use crate::remote::{queries, RemoteService};

/// How far a unit of work has already progressed on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UnitProgress {
    NotStarted,
    TransactionOpen,
    Split,
    Completed,
}

impl UnitProgress {
    /// Derived once per run from the remote state.
    pub fn derive(sub_order: &SubOrder, pick: Option<&Pick>) -> Self {
        if sub_order.status >= status::SUB_ORDER_FULFILLED {
            return UnitProgress::Completed;
        }
        match pick {
            None => UnitProgress::NotStarted,
            Some(pick) if pick.status <= status::PICK_ENTERED => UnitProgress::NotStarted,
            Some(pick) if pick.is_split() => UnitProgress::Split,
            Some(_) => UnitProgress::TransactionOpen,
        }
    }
}

/// Remote steps, named for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    CheckStatus,
    FetchPick,
    OpenPick,
    LocateSerials,
    SplitPick,
    FetchSubOrder,
    CompleteSubOrder,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::CheckStatus => "check status",
            Step::FetchPick => "fetch pick",
            Step::OpenPick => "open pick",
            Step::LocateSerials => "locate serials",
            Step::SplitPick => "split pick",
            Step::FetchSubOrder => "fetch sub-order",
            Step::CompleteSubOrder => "complete sub-order",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum UnitError {
    #[error("{step} failed: {source}")]
    Remote {
        step: Step,
        #[source]
        source: RemoteError,
    },
    #[error("{0}")]
    Validation(String),
}

impl UnitError {
    fn at(step: Step) -> impl FnOnce(RemoteError) -> UnitError {
        move |source| UnitError::Remote { step, source }
    }

    pub fn is_validation(&self) -> bool {
        match self {
            UnitError::Validation(_) => true,
            UnitError::Remote { source, .. } => source.is_validation(),
        }
    }
}

/// What a run found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitOutcome {
    /// Progress observed before this run touched anything.
    pub resumed_from: UnitProgress,
}

impl UnitOutcome {
    pub fn was_already_complete(&self) -> bool {
        self.resumed_from == UnitProgress::Completed
    }
}

#[derive(Clone)]
pub struct Executor {
    remote: Arc<dyn RemoteService>,
}

impl Executor {
    pub fn new(remote: Arc<dyn RemoteService>) -> Self {
        Self { remote }
    }

    #[instrument(skip_all, fields(item_id = item.id, sub_order = %sub_order.number))]
    pub async fn execute(
        &self,
        item: &QueueItem,
        sub_order: &SubOrderRef,
    ) -> Result<UnitOutcome, UnitError> {
        let remote = self.remote.as_ref();

        let current = remote
            .get_sub_order(sub_order.id)
            .await
            .map_err(UnitError::at(Step::CheckStatus))?;
        if UnitProgress::derive(&current, None) == UnitProgress::Completed {
            info!("sub-order already complete; nothing to do");
            return Ok(UnitOutcome {
                resumed_from: UnitProgress::Completed,
            });
        }

        let mut pick = remote
            .get_pick(sub_order.id)
            .await
            .map_err(UnitError::at(Step::FetchPick))?;
        let progress = UnitProgress::derive(&current, Some(&pick));
        debug!(?progress, pick = %pick.number, "resuming unit of work");

        if progress == UnitProgress::NotStarted {
            pick.status = status::PICK_STARTED;
            pick = remote
                .save_pick(&pick)
                .await
                .map_err(UnitError::at(Step::OpenPick))?;
        }

        if progress < UnitProgress::Split {
            pick.items = match item.operation_type {
                OperationType::Build => self.build_lines(item, &pick.items).await?,
                OperationType::Disassemble => disassembly_lines(item, &pick.items)?,
            };
            remote
                .save_pick(&pick)
                .await
                .map_err(UnitError::at(Step::SplitPick))?;
        }

        let mut order = remote
            .get_sub_order(sub_order.id)
            .await
            .map_err(UnitError::at(Step::FetchSubOrder))?;
        finalize_sub_order(item, &mut order)?;
        remote
            .save_sub_order(&order)
            .await
            .map_err(UnitError::at(Step::CompleteSubOrder))?;

        info!(?progress, "unit of work completed");
        Ok(UnitOutcome {
            resumed_from: progress,
        })
    }

    /// One pick line per (part, location) holding this item's serials.
    async fn build_lines(
        &self,
        item: &QueueItem,
        lines: &[PickLine],
    ) -> Result<Vec<PickLine>, UnitError> {
        let found = queries::serial_locations(self.remote.as_ref(), &item.serial_numbers)
            .await
            .map_err(UnitError::at(Step::LocateSerials))?;

        let mut located: BTreeMap<&str, (i64, i64)> = BTreeMap::new();
        for row in &found {
            located.insert(row.serial.as_str(), (row.part_id, row.location_id));
        }

        // Keyed by part, then location; serial order follows the item.
        let mut groups: BTreeMap<i64, BTreeMap<i64, Vec<String>>> = BTreeMap::new();
        for serial in &item.serial_numbers {
            let Some(&(part_id, location_id)) = located.get(serial.as_str()) else {
                return Err(UnitError::Validation(format!(
                    "serial {} is not known to the remote system",
                    serial
                )));
            };
            groups
                .entry(part_id)
                .or_default()
                .entry(location_id)
                .or_default()
                .push(serial.clone());
        }

        split_lines(lines, groups)
    }
}

/// Replace each serialised part's pick line with one line per location.
/// Lines for parts without serials pass through unchanged.
pub fn split_lines(
    lines: &[PickLine],
    mut groups: BTreeMap<i64, BTreeMap<i64, Vec<String>>>,
) -> Result<Vec<PickLine>, UnitError> {
    let mut out = Vec::with_capacity(lines.len());
    for line in lines {
        let Some(by_location) = groups.remove(&line.part_id) else {
            out.push(line.clone());
            continue;
        };
        for (n, (location_id, serials)) in by_location.into_iter().enumerate() {
            let mut split = line.clone();
            if n > 0 {
                split.id = None;
            }
            split.location_id = Some(location_id);
            split.quantity = serials.len() as f64;
            split.tracking = vec![Tracking::serials(serials)];
            out.push(split);
        }
    }
    if let Some(part_id) = groups.keys().next() {
        return Err(UnitError::Validation(format!(
            "serials belong to part {} which is not on the pick",
            part_id
        )));
    }
    // Split lines go first so a resumed run recognises the pick as split.
    out.sort_by_key(|line| line.tracking.is_empty());
    Ok(out)
}

/// A disassembly consumes the finished good itself from its source location.
fn disassembly_lines(item: &QueueItem, lines: &[PickLine]) -> Result<Vec<PickLine>, UnitError> {
    let Some(finished) = lines.iter().find(|l| l.part_id == item.part_id) else {
        return Err(UnitError::Validation(format!(
            "pick has no line for finished part {}",
            item.part_number
        )));
    };
    let mut consumed = finished.clone();
    consumed.quantity = 1.0;
    consumed.location_id = Some(item.location_id);
    consumed.tracking = vec![Tracking::serials(vec![item.barcode.clone()])];

    let mut out = vec![consumed];
    out.extend(lines.iter().filter(|l| l.part_id != item.part_id).cloned());
    Ok(out)
}

fn finalize_sub_order(item: &QueueItem, order: &mut SubOrder) -> Result<(), UnitError> {
    order.status = status::SUB_ORDER_FULFILLED;
    order.location_id = Some(item.location_id);

    match item.operation_type {
        OperationType::Build => {
            let Some(line) = order.items.iter_mut().find(|l| l.part_id == item.part_id) else {
                return Err(UnitError::Validation(format!(
                    "sub-order {} has no line for finished part {}",
                    order.number, item.part_number
                )));
            };
            line.tracking = vec![Tracking::serials(vec![item.barcode.clone()])];
        }
        OperationType::Disassemble => {
            let snapshot: &[BomComponent] = item.bom_snapshot.as_deref().unwrap_or_default();
            if snapshot.is_empty() {
                return Err(UnitError::Validation(format!(
                    "disassembly of {} has no captured components",
                    item.barcode
                )));
            }
            for component in snapshot {
                let Some(line) = order
                    .items
                    .iter_mut()
                    .find(|l| l.part_id == component.part_id)
                else {
                    return Err(UnitError::Validation(format!(
                        "sub-order {} has no line for component part {}",
                        order.number, component.part_id
                    )));
                };
                line.quantity = component.quantity;
                line.tracking = vec![Tracking::serials(component.serial_numbers.clone())];
            }
        }
    }
    Ok(())
}

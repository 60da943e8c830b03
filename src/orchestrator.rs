//! Batches ready queue items under parent orders and feeds them to the executor.
//!
//! Every per-item mutation is written to the queue store as soon as it
//! happens, so a crash leaves rows that a later run picks up where this one
//! stopped: items keep their parent/sub-order numbers, and the executor's own
//! progress check decides how much remote work remains.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config;
use crate::db::{self, Pool};
use crate::error::RemoteError;
use crate::executor::{Executor, UnitError};
use crate::job::JobTracker;
use crate::model::{OperationType, QueueItem, Selection};
use crate::remote::model::{status, NewParentOrder, SubOrderRef};
use crate::remote::{queries, RemoteService};

pub const SUCCESS_AFTER_RETRY: &str = "success-after-retry";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Stopped,
}

/// One parent order's worth of items.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedBatch {
    /// Set when the items already carry a number from an earlier run.
    pub parent_order: Option<String>,
    pub operation_type: OperationType,
    pub bom_id: i64,
    pub items: Vec<QueueItem>,
}

/// Resumed batches come first, grouped by their existing parent order. Fresh
/// items are grouped by operation and BOM, then cut into `batch_size` chunks.
/// Insertion order is preserved within every batch.
pub fn plan_batches(ready: Vec<QueueItem>, batch_size: usize) -> Vec<PlannedBatch> {
    let batch_size = batch_size.max(1);
    let mut resumed: Vec<PlannedBatch> = Vec::new();
    let mut fresh: Vec<((OperationType, i64), Vec<QueueItem>)> = Vec::new();

    for item in ready {
        if let Some(number) = item.parent_order_number.clone() {
            match resumed
                .iter_mut()
                .find(|b| b.parent_order.as_deref() == Some(number.as_str()))
            {
                Some(batch) => batch.items.push(item),
                None => resumed.push(PlannedBatch {
                    parent_order: Some(number),
                    operation_type: item.operation_type,
                    bom_id: item.bom_id,
                    items: vec![item],
                }),
            }
            continue;
        }
        let key = (item.operation_type, item.bom_id);
        match fresh.iter_mut().find(|(k, _)| *k == key) {
            Some((_, items)) => items.push(item),
            None => fresh.push((key, vec![item])),
        }
    }

    let mut batches = resumed;
    for ((operation_type, bom_id), items) in fresh {
        let mut items = items.into_iter().peekable();
        while items.peek().is_some() {
            batches.push(PlannedBatch {
                parent_order: None,
                operation_type,
                bom_id,
                items: items.by_ref().take(batch_size).collect(),
            });
        }
    }
    batches
}

/// The `{prefix}{YYYYMMDD}|` part of a parent-order number shared by one day's batches.
pub fn parent_prefix(settings: &config::Queue, operation: OperationType, date: NaiveDate) -> String {
    let prefix = match operation {
        OperationType::Build => &settings.build_prefix,
        OperationType::Disassemble => &settings.disassemble_prefix,
    };
    format!("{}{}|", prefix, date.format("%Y%m%d"))
}

/// One past the numerically largest sequence among `existing` numbers that
/// carry `prefix`. Sequences compare as integers, so `|10` beats `|9`.
pub fn next_sequence<'a>(
    existing: impl IntoIterator<Item = &'a str>,
    prefix: &str,
) -> Result<u64, regex::Error> {
    let pattern = Regex::new(&format!("^{}(\\d+)$", regex::escape(prefix)))?;
    let max = existing
        .into_iter()
        .filter_map(|number| pattern.captures(number))
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    Ok(max + 1)
}

#[derive(Clone)]
pub struct Orchestrator {
    pool: Pool,
    remote: Arc<dyn RemoteService>,
    tracker: Arc<JobTracker>,
    executor: Executor,
    settings: config::Queue,
}

impl Orchestrator {
    pub fn new(
        pool: Pool,
        remote: Arc<dyn RemoteService>,
        tracker: Arc<JobTracker>,
        settings: config::Queue,
    ) -> Self {
        let executor = Executor::new(Arc::clone(&remote));
        Self {
            pool,
            remote,
            tracker,
            executor,
            settings,
        }
    }

    /// Process every ready item matching `selection` until exhaustion or a stop request.
    #[instrument(skip_all)]
    pub async fn run(&self, selection: &Selection) -> Result<RunOutcome> {
        let ready = db::select_ready(&self.pool, Utc::now(), selection).await?;
        if ready.is_empty() {
            info!("no ready queue items");
            return Ok(RunOutcome::Completed);
        }

        let batches = plan_batches(ready, self.settings.batch_size);
        let total_items = batches.iter().map(|b| b.items.len()).sum();
        self.tracker.set_totals(total_items, batches.len());
        info!(total_items, batches = batches.len(), "starting batches");

        let today = Local::now().date_naive();
        let mut sequences: HashMap<String, u64> = HashMap::new();

        for (index, batch) in batches.into_iter().enumerate() {
            if self.tracker.stop_requested() {
                return Ok(RunOutcome::Stopped);
            }
            let number = match &batch.parent_order {
                Some(number) => number.clone(),
                None => {
                    let prefix = parent_prefix(&self.settings, batch.operation_type, today);
                    let number = self.allocate_number(&prefix, &mut sequences).await?;
                    let ids: Vec<i64> = batch.items.iter().map(|i| i.id).collect();
                    db::assign_parent_order(&self.pool, &ids, &number).await?;
                    number
                }
            };
            self.tracker.enter_batch(index + 1, &number);
            info!(parent_order = %number, items = batch.items.len(), "processing batch");

            if self.process_batch(&number, &batch).await? {
                return Ok(RunOutcome::Stopped);
            }
        }

        if self.tracker.stop_requested() {
            return Ok(RunOutcome::Stopped);
        }
        Ok(RunOutcome::Completed)
    }

    async fn allocate_number(
        &self,
        prefix: &str,
        sequences: &mut HashMap<String, u64>,
    ) -> Result<String> {
        let seq = match sequences.get(prefix) {
            Some(seq) => *seq,
            None => {
                let remote_rows = queries::parent_orders_like(self.remote.as_ref(), prefix)
                    .await
                    .context("failed to look up existing parent orders")?;
                let local = db::parent_numbers_with_prefix(&self.pool, prefix).await?;
                let existing = remote_rows
                    .iter()
                    .map(|r| r.number.as_str())
                    .chain(local.iter().map(String::as_str));
                next_sequence(existing, prefix)?
            }
        };
        sequences.insert(prefix.to_string(), seq + 1);
        Ok(format!("{prefix}{seq}"))
    }

    /// Returns whether a stop request ended the batch early.
    async fn process_batch(&self, number: &str, batch: &PlannedBatch) -> Result<bool> {
        // The whole batch as stored, in insertion order; sub-orders zip against this.
        let members = db::select_by_parent_order(&self.pool, number).await?;

        if let Err(err) = self.ensure_parent_order(number, batch, members.len()).await {
            self.fail_batch(
                batch,
                &format!("parent order {} could not be created: {}", number, err),
            )
            .await?;
            return Ok(false);
        }

        let sub_orders = match queries::sub_orders_for_parent(self.remote.as_ref(), number).await {
            Ok(refs) => refs,
            Err(err) => {
                self.fail_batch(
                    batch,
                    &format!("sub-orders of {} could not be resolved: {}", number, err),
                )
                .await?;
                return Ok(false);
            }
        };
        if sub_orders.len() != members.len() {
            self.fail_batch(
                batch,
                &format!(
                    "parent order {} has {} sub-orders for {} queued items",
                    number,
                    sub_orders.len(),
                    members.len()
                ),
            )
            .await?;
            return Ok(false);
        }

        let wanted: HashSet<i64> = batch.items.iter().map(|i| i.id).collect();
        let mut work = Vec::new();
        for (sub_order, member) in sub_orders.into_iter().zip(members) {
            if !wanted.contains(&member.id) || member.status.is_terminal() {
                continue;
            }
            match member.sub_order_number.as_deref() {
                Some(stored) if stored != sub_order.number => {
                    let message = format!(
                        "stored sub-order {} does not match resolved sub-order {}",
                        stored, sub_order.number
                    );
                    warn!(item_id = member.id, %message, "sub-order mismatch");
                    db::mark_failed(&self.pool, member.id, &message).await?;
                    self.tracker.record_outcome(false);
                    continue;
                }
                Some(_) => {}
                None => {
                    db::assign_sub_order(&self.pool, member.id, &sub_order.number).await?;
                }
            }
            work.push((member, sub_order));
        }

        let fatal_seen = AtomicBool::new(false);
        let results = stream::iter(work)
            .take_while(|_| {
                futures::future::ready(
                    !self.tracker.stop_requested() && !fatal_seen.load(Ordering::SeqCst),
                )
            })
            .map(|(item, sub_order)| self.process_item(item, sub_order))
            .buffered(self.settings.concurrency.max(1));
        futures::pin_mut!(results);

        // A store failure is fatal, but items already in flight are allowed to finish.
        let mut first_fatal = None;
        while let Some(result) = results.next().await {
            if let Err(err) = result {
                fatal_seen.store(true, Ordering::SeqCst);
                first_fatal.get_or_insert(err);
            }
        }
        if let Some(err) = first_fatal {
            return Err(err);
        }
        Ok(self.tracker.stop_requested())
    }

    /// Look the parent order up by number; create it if missing and issue it if
    /// it has not been issued yet.
    async fn ensure_parent_order(
        &self,
        number: &str,
        batch: &PlannedBatch,
        quantity: usize,
    ) -> Result<(), RemoteError> {
        let remote = self.remote.as_ref();
        let (id, state) = match queries::parent_order_by_number(remote, number).await? {
            Some(row) => (row.id, row.status),
            None => {
                let first = batch.items.first();
                let order = NewParentOrder {
                    number: number.to_string(),
                    bom_id: batch.bom_id,
                    quantity: quantity as f64,
                    location_id: first.map(|i| i.location_id).unwrap_or_default(),
                    note: format!(
                        "{} batch of {} item(s)",
                        batch.operation_type.as_str(),
                        quantity
                    ),
                };
                let created = remote.create_parent_order(&order).await?;
                info!(parent_order = %number, id = created.id, "parent order created");
                (created.id, created.status)
            }
        };
        if state < status::PARENT_ISSUED {
            remote.issue_parent_order(id).await?;
            info!(parent_order = %number, "parent order issued");
        }
        Ok(())
    }

    async fn fail_batch(&self, batch: &PlannedBatch, message: &str) -> Result<()> {
        warn!(%message, items = batch.items.len(), "batch failed");
        for item in &batch.items {
            if db::mark_failed(&self.pool, item.id, message).await? {
                self.tracker.record_outcome(false);
            }
        }
        Ok(())
    }

    fn should_retry(&self, item: &QueueItem, err: &UnitError) -> bool {
        item.retry_count < self.settings.max_retries
            && (self.settings.retry_validation_failures || !err.is_validation())
    }

    #[instrument(skip_all, fields(item_id = item.id, sub_order = %sub_order.number))]
    async fn process_item(&self, item: QueueItem, sub_order: SubOrderRef) -> Result<()> {
        self.tracker.set_current_sub_order(&sub_order.number);

        let success = match self.executor.execute(&item, &sub_order).await {
            Ok(outcome) => {
                db::mark_success(&self.pool, item.id, None).await?;
                info!(resumed_from = ?outcome.resumed_from, "item succeeded");
                true
            }
            Err(err) if self.should_retry(&item, &err) => {
                warn!(error = %err, attempt = item.retry_count + 1, "item failed; retrying once");
                // Persisted first so a crash mid-retry cannot earn another one.
                if !db::increment_retry(&self.pool, item.id, self.settings.max_retries).await? {
                    db::mark_failed(&self.pool, item.id, &err.to_string()).await?;
                    false
                } else {
                    match self.executor.execute(&item, &sub_order).await {
                        Ok(_) => {
                            let note = format!("{}: first attempt failed: {}", SUCCESS_AFTER_RETRY, err);
                            db::mark_success(&self.pool, item.id, Some(&note)).await?;
                            info!("item succeeded after retry");
                            true
                        }
                        Err(retry_err) => {
                            warn!(error = %retry_err, "item failed after retry");
                            db::mark_failed(&self.pool, item.id, &format!("retry failed: {}", retry_err))
                                .await?;
                            false
                        }
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "item failed");
                db::mark_failed(&self.pool, item.id, &err.to_string()).await?;
                false
            }
        };
        self.tracker.record_outcome(success);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemStatus;

    fn item(id: i64, op: OperationType, bom_id: i64, parent: Option<&str>) -> QueueItem {
        let now = Utc::now();
        QueueItem {
            id,
            operation_type: op,
            barcode: format!("FG{id}"),
            serial_numbers: vec![],
            bom_snapshot: None,
            location_id: 1,
            part_id: 1000,
            part_number: "FG-1000".into(),
            bom_id,
            bom_number: format!("BOM-{bom_id}"),
            status: ItemStatus::Pending,
            scheduled_for: None,
            parent_order_number: parent.map(str::to_string),
            sub_order_number: None,
            error_message: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    #[test]
    fn sequence_comparison_is_numeric() {
        let existing = ["BLD20261019|9", "BLD20261019|10", "BLD20261019|2"];
        assert_eq!(next_sequence(existing, "BLD20261019|").unwrap(), 11);
    }

    #[test]
    fn sequence_ignores_other_days_and_garbage() {
        let existing = ["BLD20261018|40", "BLD20261019|x", "DIS20261019|7", "BLD20261019|003"];
        assert_eq!(next_sequence(existing, "BLD20261019|").unwrap(), 4);
        assert_eq!(next_sequence(std::iter::empty(), "BLD20261019|").unwrap(), 1);
    }

    #[test]
    fn prefix_uses_operation_and_date() {
        let settings = config::Queue::default();
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(
            parent_prefix(&settings, OperationType::Build, date),
            "BLD20261019|"
        );
        assert_eq!(
            parent_prefix(&settings, OperationType::Disassemble, date),
            "DIS20261019|"
        );
    }

    #[test]
    fn batches_are_homogeneous_and_sized() {
        let mut ready: Vec<QueueItem> = (1..=5)
            .map(|id| item(id, OperationType::Build, 7, None))
            .collect();
        ready.push(item(6, OperationType::Disassemble, 8, None));
        ready.push(item(7, OperationType::Build, 7, None));

        let batches = plan_batches(ready, 3);
        let shape: Vec<(OperationType, Vec<i64>)> = batches
            .iter()
            .map(|b| (b.operation_type, b.items.iter().map(|i| i.id).collect()))
            .collect();
        assert_eq!(
            shape,
            vec![
                (OperationType::Build, vec![1, 2, 3]),
                (OperationType::Build, vec![4, 5, 7]),
                (OperationType::Disassemble, vec![6]),
            ]
        );
        assert!(batches.iter().all(|b| b.parent_order.is_none()));
    }

    #[test]
    fn resumed_batches_come_first_and_keep_their_number() {
        let ready = vec![
            item(1, OperationType::Build, 7, None),
            item(2, OperationType::Build, 7, Some("BLD20261018|3")),
            item(3, OperationType::Build, 7, Some("BLD20261018|3")),
        ];
        let batches = plan_batches(ready, 100);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].parent_order.as_deref(), Some("BLD20261018|3"));
        assert_eq!(batches[0].items.len(), 2);
        assert_eq!(batches[1].items[0].id, 1);
    }
}

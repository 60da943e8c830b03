use crate::db::model::{QueueCounts, StatusCount};
use crate::model::{BomComponent, ItemStatus, NewQueueItem, OperationType, QueueItem, Selection};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

const ITEM_COLUMNS: &str = "id, operation_type, barcode, serial_numbers, bom_snapshot, location_id, \
     part_id, part_number, bom_id, bom_number, status, scheduled_for, parent_order_number, \
     sub_order_number, error_message, retry_count, created_at, updated_at, completed_at";

// Keeps IN lists well under SQLite's bound-parameter limit.
const IN_CHUNK: usize = 500;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {normalized}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory and non-sqlite URLs untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn item_from_row(row: &SqliteRow) -> Result<QueueItem> {
    let id: i64 = row.try_get("id")?;

    let op: String = row.try_get("operation_type")?;
    let operation_type = OperationType::parse(&op)
        .ok_or_else(|| anyhow!("queue item {} has unknown operation type {}", id, op))?;
    let status_str: String = row.try_get("status")?;
    let status = ItemStatus::parse(&status_str)
        .ok_or_else(|| anyhow!("queue item {} has unknown status {}", id, status_str))?;

    let serials_raw: String = row.try_get("serial_numbers")?;
    let serial_numbers: Vec<String> = serde_json::from_str(&serials_raw)
        .with_context(|| format!("queue item {} has malformed serial_numbers", id))?;
    let bom_snapshot = row
        .try_get::<Option<String>, _>("bom_snapshot")?
        .map(|raw| serde_json::from_str::<Vec<BomComponent>>(&raw))
        .transpose()
        .with_context(|| format!("queue item {} has malformed bom_snapshot", id))?;

    Ok(QueueItem {
        id,
        operation_type,
        barcode: row.try_get("barcode")?,
        serial_numbers,
        bom_snapshot,
        location_id: row.try_get("location_id")?,
        part_id: row.try_get("part_id")?,
        part_number: row.try_get("part_number")?,
        bom_id: row.try_get("bom_id")?,
        bom_number: row.try_get("bom_number")?,
        status,
        scheduled_for: row.try_get("scheduled_for")?,
        parent_order_number: row.try_get("parent_order_number")?,
        sub_order_number: row.try_get("sub_order_number")?,
        error_message: row.try_get("error_message")?,
        retry_count: row.try_get("retry_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

async fn insert_item_tx(
    tx: &mut Transaction<'_, Sqlite>,
    item: &NewQueueItem,
    now: DateTime<Utc>,
) -> Result<i64> {
    let serials = serde_json::to_string(&item.serial_numbers)?;
    let snapshot = item
        .bom_snapshot
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let rec = sqlx::query(
        "INSERT INTO queue_items (operation_type, barcode, serial_numbers, bom_snapshot, location_id, \
         part_id, part_number, bom_id, bom_number, status, scheduled_for, retry_count, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, 0, ?, ?) RETURNING id",
    )
    .bind(item.operation_type.as_str())
    .bind(&item.barcode)
    .bind(serials)
    .bind(snapshot)
    .bind(item.location_id)
    .bind(item.part_id)
    .bind(&item.part_number)
    .bind(item.bom_id)
    .bind(&item.bom_number)
    .bind(item.scheduled_for)
    .bind(now)
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn insert_item(pool: &Pool, item: &NewQueueItem) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let id = insert_item_tx(&mut tx, item, Utc::now()).await?;
    tx.commit().await?;
    Ok(id)
}

/// Insert all items or none.
#[instrument(skip_all, fields(count = items.len()))]
pub async fn insert_items(pool: &Pool, items: &[NewQueueItem]) -> Result<Vec<i64>> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        ids.push(insert_item_tx(&mut tx, item, now).await?);
    }
    tx.commit().await?;
    Ok(ids)
}

pub async fn get_item(pool: &Pool, id: i64) -> Result<Option<QueueItem>> {
    let sql = format!("SELECT {ITEM_COLUMNS} FROM queue_items WHERE id = ?");
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(item_from_row).transpose()
}

/// Pending items matching `selection` whose deferral (if any) has elapsed, in insertion order.
#[instrument(skip_all)]
pub async fn select_ready(
    pool: &Pool,
    now: DateTime<Utc>,
    selection: &Selection,
) -> Result<Vec<QueueItem>> {
    let schedule_clause = if selection.scheduled_only {
        "scheduled_for IS NOT NULL AND datetime(scheduled_for) <= datetime(?)"
    } else {
        "(scheduled_for IS NULL OR datetime(scheduled_for) <= datetime(?))"
    };
    let sql = format!(
        "SELECT {ITEM_COLUMNS} FROM queue_items \
         WHERE status = 'pending' AND {schedule_clause} \
         AND (? IS NULL OR operation_type = ?) \
         ORDER BY id ASC"
    );
    let op = selection.operation_type.map(|o| o.as_str());
    let rows = sqlx::query(&sql)
        .bind(now)
        .bind(op)
        .bind(op)
        .fetch_all(pool)
        .await?;
    rows.iter().map(item_from_row).collect()
}

/// Pending items with a non-null `scheduled_for` that has elapsed.
pub async fn count_due_scheduled(pool: &Pool, now: DateTime<Utc>) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM queue_items WHERE status = 'pending' \
         AND scheduled_for IS NOT NULL AND datetime(scheduled_for) <= datetime(?)",
    )
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn select_by_parent_order(pool: &Pool, parent_order: &str) -> Result<Vec<QueueItem>> {
    let sql =
        format!("SELECT {ITEM_COLUMNS} FROM queue_items WHERE parent_order_number = ? ORDER BY id ASC");
    let rows = sqlx::query(&sql).bind(parent_order).fetch_all(pool).await?;
    rows.iter().map(item_from_row).collect()
}

/// Stamp a batch's parent-order number onto its rows. Rows that already carry
/// a number keep it. Returns the number of rows stamped.
#[instrument(skip_all, fields(parent_order = %parent_order))]
pub async fn assign_parent_order(pool: &Pool, ids: &[i64], parent_order: &str) -> Result<u64> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    let mut stamped = 0;
    for id in ids {
        let res = sqlx::query(
            "UPDATE queue_items SET parent_order_number = ?, updated_at = ? \
             WHERE id = ? AND parent_order_number IS NULL",
        )
        .bind(parent_order)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        stamped += res.rows_affected();
    }
    tx.commit().await?;
    Ok(stamped)
}

/// Record the generated sub-order for an item. A number, once set, is never replaced.
pub async fn assign_sub_order(pool: &Pool, id: i64, sub_order: &str) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE queue_items SET sub_order_number = ?, updated_at = ? \
         WHERE id = ? AND sub_order_number IS NULL",
    )
    .bind(sub_order)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await
    .context("failed to persist sub-order number")?;
    Ok(res.rows_affected() == 1)
}

async fn finish_item(
    pool: &Pool,
    id: i64,
    status: ItemStatus,
    message: Option<&str>,
) -> Result<bool> {
    let now = Utc::now();
    let res = sqlx::query(
        "UPDATE queue_items SET status = ?, error_message = ?, completed_at = ?, updated_at = ? \
         WHERE id = ? AND status = 'pending'",
    )
    .bind(status.as_str())
    .bind(message)
    .bind(now)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await
    .with_context(|| format!("failed to mark queue item {} {}", id, status.as_str()))?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all, fields(id = id))]
pub async fn mark_success(pool: &Pool, id: i64, note: Option<&str>) -> Result<bool> {
    finish_item(pool, id, ItemStatus::Success, note).await
}

#[instrument(skip_all, fields(id = id))]
pub async fn mark_failed(pool: &Pool, id: i64, error_message: &str) -> Result<bool> {
    finish_item(pool, id, ItemStatus::Failed, Some(error_message)).await
}

/// Consume one retry, refusing once `max_retries` is reached.
#[instrument(skip_all, fields(id = id))]
pub async fn increment_retry(pool: &Pool, id: i64, max_retries: i64) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE queue_items SET retry_count = retry_count + 1, updated_at = ? \
         WHERE id = ? AND status = 'pending' AND retry_count < ?",
    )
    .bind(Utc::now())
    .bind(id)
    .bind(max_retries)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all, fields(parent_order = %parent_order))]
pub async fn mark_closed_short(pool: &Pool, parent_order: &str, note: &str) -> Result<u64> {
    let now = Utc::now();
    let res = sqlx::query(
        "UPDATE queue_items SET status = 'closed_short', error_message = ?, completed_at = ?, updated_at = ? \
         WHERE parent_order_number = ? AND status = 'pending'",
    )
    .bind(note)
    .bind(now)
    .bind(now)
    .bind(parent_order)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

/// Parent orders that still have un-terminated items, oldest batch first.
pub async fn open_parent_orders(pool: &Pool) -> Result<Vec<String>> {
    let numbers = sqlx::query_scalar(
        "SELECT parent_order_number FROM queue_items \
         WHERE status = 'pending' AND parent_order_number IS NOT NULL \
         GROUP BY parent_order_number ORDER BY MIN(id) ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(numbers)
}

pub async fn delete_pending_for_parent(pool: &Pool, parent_order: &str) -> Result<u64> {
    let res = sqlx::query(
        "DELETE FROM queue_items WHERE parent_order_number = ? AND status = 'pending'",
    )
    .bind(parent_order)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

/// Delete pending items that never joined a batch.
pub async fn delete_pending_unassigned(pool: &Pool) -> Result<u64> {
    let res = sqlx::query(
        "DELETE FROM queue_items WHERE parent_order_number IS NULL AND status = 'pending'",
    )
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

/// Distinct parent-order numbers persisted locally that start with `prefix`.
pub async fn parent_numbers_with_prefix(pool: &Pool, prefix: &str) -> Result<Vec<String>> {
    let numbers = sqlx::query_scalar(
        "SELECT DISTINCT parent_order_number FROM queue_items \
         WHERE parent_order_number IS NOT NULL AND substr(parent_order_number, 1, length(?)) = ?",
    )
    .bind(prefix)
    .bind(prefix)
    .fetch_all(pool)
    .await?;
    Ok(numbers)
}

/// Which of `barcodes` already sit in the queue as pending items.
pub async fn pending_barcodes(pool: &Pool, barcodes: &[String]) -> Result<HashSet<String>> {
    let mut found = HashSet::new();
    for chunk in barcodes.chunks(IN_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT DISTINCT barcode FROM queue_items WHERE status = 'pending' AND barcode IN (",
        );
        let mut separated = qb.separated(", ");
        for barcode in chunk {
            separated.push_bind(barcode);
        }
        separated.push_unseparated(")");
        let rows: Vec<String> = qb.build_query_scalar().fetch_all(pool).await?;
        found.extend(rows);
    }
    Ok(found)
}

/// The most recent successful build of `barcode`, if any.
pub async fn latest_successful_build(pool: &Pool, barcode: &str) -> Result<Option<QueueItem>> {
    let sql = format!(
        "SELECT {ITEM_COLUMNS} FROM queue_items \
         WHERE barcode = ? AND operation_type = 'build' AND status = 'success' \
         ORDER BY id DESC LIMIT 1"
    );
    let row = sqlx::query(&sql).bind(barcode).fetch_optional(pool).await?;
    row.as_ref().map(item_from_row).transpose()
}

pub async fn count_by_status(pool: &Pool, now: DateTime<Utc>) -> Result<QueueCounts> {
    let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM queue_items GROUP BY status")
        .fetch_all(pool)
        .await?;
    let mut counts = QueueCounts::default();
    for row in rows {
        let status_str: String = row.get("status");
        let status = ItemStatus::parse(&status_str)
            .ok_or_else(|| anyhow!("unknown queue status {}", status_str))?;
        counts.add(&StatusCount {
            status,
            count: row.get("n"),
        });
    }
    counts.deferred = sqlx::query_scalar(
        "SELECT COUNT(*) FROM queue_items WHERE status = 'pending' \
         AND scheduled_for IS NOT NULL AND datetime(scheduled_for) > datetime(?)",
    )
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(counts)
}

pub async fn save_auth_token(pool: &Pool, token: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO auth_cache (id, token, updated_at) VALUES (1, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET token = excluded.token, updated_at = excluded.updated_at",
    )
    .bind(token)
    .bind(Utc::now())
    .execute(pool)
    .await
    .context("failed to cache remote session")?;
    Ok(())
}

pub async fn load_auth_token(pool: &Pool) -> Result<Option<String>> {
    let token = sqlx::query_scalar("SELECT token FROM auth_cache WHERE id = 1")
        .fetch_optional(pool)
        .await?;
    Ok(token)
}

pub async fn clear_auth_token(pool: &Pool) -> Result<()> {
    sqlx::query("DELETE FROM auth_cache WHERE id = 1")
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn setup_pool() -> Pool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn build(barcode: &str) -> NewQueueItem {
        NewQueueItem {
            operation_type: OperationType::Build,
            barcode: barcode.into(),
            serial_numbers: vec![format!("{barcode}-S1"), format!("{barcode}-S2")],
            bom_snapshot: None,
            location_id: 3,
            part_id: 1000,
            part_number: "FG-1000".into(),
            bom_id: 77,
            bom_number: "BOM-77".into(),
            scheduled_for: None,
        }
    }

    #[tokio::test]
    async fn insert_and_read_back() {
        let pool = setup_pool().await;
        let mut item = build("FG1");
        item.bom_snapshot = Some(vec![BomComponent {
            part_id: 500,
            quantity: 2.0,
            serial_numbers: vec!["A".into(), "B".into()],
        }]);
        let id = insert_item(&pool, &item).await.unwrap();

        let stored = get_item(&pool, id).await.unwrap().unwrap();
        assert_eq!(stored.status, ItemStatus::Pending);
        assert_eq!(stored.serial_numbers, item.serial_numbers);
        assert_eq!(stored.bom_snapshot, item.bom_snapshot);
        assert_eq!(stored.retry_count, 0);
        assert!(stored.parent_order_number.is_none());
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn ready_selection_respects_schedule_and_type() {
        let pool = setup_pool().await;
        let now = Utc::now();

        let immediate = insert_item(&pool, &build("A")).await.unwrap();
        let mut due = build("B");
        due.scheduled_for = Some(now - Duration::minutes(5));
        let due = insert_item(&pool, &due).await.unwrap();
        let mut later = build("C");
        later.scheduled_for = Some(now + Duration::hours(2));
        insert_item(&pool, &later).await.unwrap();
        let mut dis = build("D");
        dis.operation_type = OperationType::Disassemble;
        let dis = insert_item(&pool, &dis).await.unwrap();

        let ready: Vec<i64> = select_ready(&pool, now, &Selection::all())
            .await
            .unwrap()
            .iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ready, vec![immediate, due, dis]);

        let scheduled: Vec<i64> = select_ready(&pool, now, &Selection::scheduled())
            .await
            .unwrap()
            .iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(scheduled, vec![due]);

        let builds_only = Selection {
            operation_type: Some(OperationType::Build),
            scheduled_only: false,
        };
        let ready = select_ready(&pool, now, &builds_only).await.unwrap();
        assert_eq!(ready.len(), 2);

        assert_eq!(count_due_scheduled(&pool, now).await.unwrap(), 1);
        let counts = count_by_status(&pool, now).await.unwrap();
        assert_eq!(counts.pending, 4);
        assert_eq!(counts.deferred, 1);
    }

    #[tokio::test]
    async fn parent_and_sub_order_numbers_are_never_reassigned() {
        let pool = setup_pool().await;
        let ids = insert_items(&pool, &[build("A"), build("B")]).await.unwrap();

        assert_eq!(assign_parent_order(&pool, &ids, "BLD20261019|1").await.unwrap(), 2);
        assert_eq!(assign_parent_order(&pool, &ids, "BLD20261019|2").await.unwrap(), 0);

        assert!(assign_sub_order(&pool, ids[0], "WO-1").await.unwrap());
        assert!(!assign_sub_order(&pool, ids[0], "WO-9").await.unwrap());

        let batch = select_by_parent_order(&pool, "BLD20261019|1").await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].sub_order_number.as_deref(), Some("WO-1"));
        assert_eq!(
            parent_numbers_with_prefix(&pool, "BLD20261019|").await.unwrap(),
            vec!["BLD20261019|1".to_string()]
        );
        assert_eq!(open_parent_orders(&pool).await.unwrap(), vec!["BLD20261019|1".to_string()]);
    }

    #[tokio::test]
    async fn retry_count_is_capped() {
        let pool = setup_pool().await;
        let id = insert_item(&pool, &build("A")).await.unwrap();
        assert!(increment_retry(&pool, id, 1).await.unwrap());
        assert!(!increment_retry(&pool, id, 1).await.unwrap());
        assert_eq!(get_item(&pool, id).await.unwrap().unwrap().retry_count, 1);
    }

    #[tokio::test]
    async fn terminal_status_is_final() {
        let pool = setup_pool().await;
        let id = insert_item(&pool, &build("A")).await.unwrap();
        assert!(mark_failed(&pool, id, "boom").await.unwrap());
        assert!(!mark_success(&pool, id, None).await.unwrap());

        let stored = get_item(&pool, id).await.unwrap().unwrap();
        assert_eq!(stored.status, ItemStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("boom"));
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn clear_helpers_only_touch_pending_rows() {
        let pool = setup_pool().await;
        let ids = insert_items(&pool, &[build("A"), build("B"), build("C")]).await.unwrap();
        assign_parent_order(&pool, &ids[..2], "BLD20261019|4").await.unwrap();
        mark_success(&pool, ids[0], None).await.unwrap();

        assert_eq!(delete_pending_for_parent(&pool, "BLD20261019|4").await.unwrap(), 1);
        assert_eq!(delete_pending_unassigned(&pool).await.unwrap(), 1);
        assert!(get_item(&pool, ids[0]).await.unwrap().is_some());
        assert!(open_parent_orders(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_barcode_lookup_and_latest_build() {
        let pool = setup_pool().await;
        let ids = insert_items(&pool, &[build("A"), build("B")]).await.unwrap();
        mark_success(&pool, ids[1], None).await.unwrap();

        let found = pending_barcodes(&pool, &["A".into(), "B".into(), "Z".into()])
            .await
            .unwrap();
        assert!(found.contains("A"));
        assert!(!found.contains("B"));

        let latest = latest_successful_build(&pool, "B").await.unwrap().unwrap();
        assert_eq!(latest.id, ids[1]);
        assert!(latest_successful_build(&pool, "A").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn auth_token_cache_round_trip() {
        let pool = setup_pool().await;
        assert!(load_auth_token(&pool).await.unwrap().is_none());
        save_auth_token(&pool, "t1").await.unwrap();
        save_auth_token(&pool, "t2").await.unwrap();
        assert_eq!(load_auth_token(&pool).await.unwrap().as_deref(), Some("t2"));
        clear_auth_token(&pool).await.unwrap();
        assert!(load_auth_token(&pool).await.unwrap().is_none());
    }

    #[test]
    fn sqlite_url_normalisation() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(prepare_sqlite_url("postgres://x"), "postgres://x");
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("nested/queue.db");
        let url = prepare_sqlite_url(&format!("sqlite:{}?mode=rwc", path.display()));
        assert_eq!(url, format!("sqlite://{}?mode=rwc", path.display()));
        assert!(path.parent().unwrap().exists());
    }
}

//! Read-only data queries issued through [`RemoteService::query`].

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::model::{ParentOrderRow, SerialLocation, SerialPart, SubOrderRef};
use super::{RemoteService, Row};
use crate::error::RemoteError;

/// Quote a string literal for the remote query language.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn parent_orders_like_sql(pattern_prefix: &str) -> String {
    let escaped = pattern_prefix
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!(
        "SELECT mo.id AS id, mo.num AS num, mo.statusId AS status FROM mo WHERE mo.num LIKE {} ESCAPE '\\'",
        quote(&format!("{escaped}%"))
    )
}

pub fn parent_order_by_number_sql(number: &str) -> String {
    format!(
        "SELECT mo.id AS id, mo.num AS num, mo.statusId AS status FROM mo WHERE mo.num = {}",
        quote(number)
    )
}

pub fn sub_orders_for_parent_sql(parent_number: &str) -> String {
    format!(
        "SELECT wo.id AS id, wo.num AS num FROM wo \
         INNER JOIN moitem ON moitem.id = wo.moItemId \
         INNER JOIN mo ON mo.id = moitem.moId \
         WHERE mo.num = {} ORDER BY wo.id ASC",
        quote(parent_number)
    )
}

pub fn serial_locations_sql(serials: &[String]) -> String {
    let list = serials
        .iter()
        .map(|s| quote(s))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT serialnum.serialNum AS serial, tag.partId AS partId, tag.locationId AS locationId \
         FROM serialnum INNER JOIN serial ON serial.id = serialnum.serialId \
         INNER JOIN tag ON tag.id = serial.tagId \
         WHERE serialnum.serialNum IN ({list})"
    )
}

pub fn serial_parts_sql(serials: &[String]) -> String {
    let list = serials
        .iter()
        .map(|s| quote(s))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT serialnum.serialNum AS serial, serial.partId AS partId \
         FROM serialnum INNER JOIN serial ON serial.id = serialnum.serialId \
         WHERE serialnum.serialNum IN ({list})"
    )
}

fn decode_rows<T: DeserializeOwned>(
    operation: &'static str,
    rows: Vec<Row>,
) -> Result<Vec<T>, RemoteError> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(Value::Object(row))
                .map_err(|source| RemoteError::Decode { operation, source })
        })
        .collect()
}

pub async fn parent_orders_like(
    remote: &dyn RemoteService,
    pattern_prefix: &str,
) -> Result<Vec<ParentOrderRow>, RemoteError> {
    let rows = remote.query(&parent_orders_like_sql(pattern_prefix)).await?;
    decode_rows("parent_orders_like", rows)
}

pub async fn parent_order_by_number(
    remote: &dyn RemoteService,
    number: &str,
) -> Result<Option<ParentOrderRow>, RemoteError> {
    let rows = remote.query(&parent_order_by_number_sql(number)).await?;
    Ok(decode_rows("parent_order_by_number", rows)?.into_iter().next())
}

/// Generated sub-orders in creation order.
pub async fn sub_orders_for_parent(
    remote: &dyn RemoteService,
    parent_number: &str,
) -> Result<Vec<SubOrderRef>, RemoteError> {
    let rows = remote.query(&sub_orders_for_parent_sql(parent_number)).await?;
    let mut refs: Vec<SubOrderRef> = decode_rows("sub_orders_for_parent", rows)?;
    refs.sort_by_key(|r| r.id);
    Ok(refs)
}

pub async fn serial_locations(
    remote: &dyn RemoteService,
    serials: &[String],
) -> Result<Vec<SerialLocation>, RemoteError> {
    if serials.is_empty() {
        return Ok(Vec::new());
    }
    let rows = remote.query(&serial_locations_sql(serials)).await?;
    decode_rows("serial_locations", rows)
}

/// Resolves serials to parts without requiring a current location, so
/// components already consumed into a finished good are still found.
pub async fn serial_parts(
    remote: &dyn RemoteService,
    serials: &[String],
) -> Result<Vec<SerialPart>, RemoteError> {
    if serials.is_empty() {
        return Ok(Vec::new());
    }
    let rows = remote.query(&serial_parts_sql(serials)).await?;
    decode_rows("serial_parts", rows)
}

//! Small helpers shared by the accounting mapping functions.

use anyhow::Result;
use serde_json::Value;

use crate::db::{DbTransaction, Fields, LocalRecord};
use crate::resource::{id_from_value, Resource};

/// A payload value as text. Amounts arrive as decimal strings and are kept
/// that way; numbers are rendered in their JSON form.
pub(crate) fn text(resource: &Resource, key: &str) -> Value {
    match resource.get(key) {
        Some(Value::String(s)) => Value::String(s.clone()),
        Some(Value::Number(n)) => Value::String(n.to_string()),
        Some(Value::Bool(b)) => Value::String(b.to_string()),
        _ => Value::Null,
    }
}

pub(crate) fn flag(resource: &Resource, key: &str) -> Value {
    match resource.get(key).and_then(Value::as_bool) {
        Some(b) => Value::from(b as i64),
        None => Value::Null,
    }
}

/// Local id of the row a payload references through `key`, creating a
/// placeholder row if the referenced resource was not synced yet.
pub(crate) fn reference(
    txn: &DbTransaction,
    resource: &Resource,
    key: &str,
    table: &str,
) -> Result<Value> {
    match resource.get(key).and_then(id_from_value) {
        Some(moneybird_id) => Ok(Value::from(txn.resolve_reference(table, None, &moneybird_id)?)),
        None => Ok(Value::Null),
    }
}

/// Remote id of the row `record.column` points at, if that row was synced.
pub(crate) fn remote_reference(
    txn: &DbTransaction,
    record: &LocalRecord,
    column: &str,
    table: &str,
) -> Result<Value> {
    let Some(local_id) = record.get_i64(column) else {
        return Ok(Value::Null);
    };
    Ok(txn
        .get(table, local_id)?
        .and_then(|referenced| referenced.moneybird_id)
        .map(Value::String)
        .unwrap_or(Value::Null))
}

pub(crate) fn fields<const N: usize>(pairs: [(&str, Value); N]) -> Fields {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// A write payload. Null values are left out so they do not clear remote
/// attributes the local table does not mirror.
pub(crate) fn payload<const N: usize>(pairs: [(&str, Value); N]) -> Resource {
    Value::Object(
        pairs
            .into_iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| (key.to_string(), value))
            .collect(),
    )
}

pub(crate) fn column(record: &LocalRecord, column: &str) -> Value {
    record.get(column).cloned().unwrap_or(Value::Null)
}

//! Writes local rows upstream and merges the administration's answer back.
//!
//! Requests are made outside of any database transaction. The local row is
//! only touched after the administration accepted the write, so a failed
//! push leaves it as it was.

use std::collections::HashSet;

use anyhow::Result;
use serde_json::{Map, Value};

use crate::administration::Administration;
use crate::db::{Db, DbTransaction, Fields, LocalRecord};
use crate::resource::{resource_id, resource_version, Resource, ResourceId};
use crate::resource_type::{DocumentLines, ResourceType};
use crate::sync::applier::save_resource_returning_id;

/// Creates or updates the remote resource mirrored by row `local_id`.
///
/// Rows without a remote id are POSTed together with their lines, rows with
/// one are PATCHed. Returns the merged response, or `None` when the type is
/// read-only or the row serializes to nothing.
pub fn push_resource(
    administration: &dyn Administration,
    db: &Db,
    resource_type: &ResourceType,
    local_id: i64,
) -> Result<Option<Resource>> {
    if !resource_type.can_write {
        log::debug!("{} is read-only, not pushing row {}", resource_type.entity_type, local_id);
        return Ok(None);
    }

    let request = db.transaction(|t| {
        let record = owned_record(t, resource_type, local_id)?;
        let Some(mut data) = serialize(t, resource_type.serialize, &record)? else {
            return Ok(None);
        };
        if record.moneybird_id.is_none() {
            if let (Some(lines), Some(object)) = (&resource_type.document_lines, data.as_object_mut()) {
                object.insert(
                    lines.attributes_name.to_string(),
                    Value::Array(draft_lines(t, lines, local_id)?),
                );
            }
        }
        Ok(Some((record.moneybird_id, data)))
    })?;
    let Some((moneybird_id, data)) = request else {
        log::debug!("{} row {} has nothing to push", resource_type.entity_type, local_id);
        return Ok(None);
    };

    let body = envelope(resource_type.entity_type_name, data);
    let response = match &moneybird_id {
        None => administration.post(resource_type.api_path, &body)?,
        Some(id) => administration.patch(&resource_type.resource_path(id), &body)?,
    };
    log::info!(
        "PUSH {} row {}: {}",
        resource_type.entity_type,
        local_id,
        if moneybird_id.is_none() { "created" } else { "updated" }
    );

    db.transaction(|t| {
        if moneybird_id.is_none() {
            // The response carries the lines that were sent, now with ids.
            if let Some(lines) = &resource_type.document_lines {
                for draft in drafts(t, lines, local_id)? {
                    t.delete(lines.table, draft.id)?;
                }
            }
        }
        merge_response(t, resource_type, local_id, &response)
    })?;
    Ok(Some(response))
}

/// Deletes the remote resource mirrored by row `local_id`, then the row
/// itself. Rows that were never pushed are only deleted locally.
pub fn delete_resource(
    administration: &dyn Administration,
    db: &Db,
    resource_type: &ResourceType,
    local_id: i64,
) -> Result<()> {
    if !resource_type.can_delete {
        anyhow::bail!("{} cannot be deleted remotely", resource_type.entity_type);
    }
    let record = db.transaction(|t| owned_record(t, resource_type, local_id))?;
    if let Some(moneybird_id) = &record.moneybird_id {
        match administration.delete(&resource_type.resource_path(moneybird_id)) {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                log::info!("{} {} was already gone remotely", resource_type.entity_type, moneybird_id);
            }
            Err(e) => return Err(e.into()),
        }
    }
    db.transaction(|t| t.delete(resource_type.table, local_id))?;
    Ok(())
}

/// Creates or updates a single line by patching its parent document.
/// Returns the merged parent.
pub fn push_line(
    administration: &dyn Administration,
    db: &Db,
    resource_type: &ResourceType,
    line_id: i64,
) -> Result<Option<Resource>> {
    let lines = writable_lines(resource_type)?;
    let request = db.transaction(|t| {
        let (line, parent) = line_and_parent(t, resource_type, lines, line_id)?;
        let Some(mut data) = serialize(t, lines.serialize, &line)? else {
            return Ok(None);
        };
        if let (Some(id), Some(object)) = (&line.moneybird_id, data.as_object_mut()) {
            object.insert("id".to_string(), Value::String(id.clone()));
        }
        let known = synced_line_ids(t, lines, parent.id)?;
        Ok(Some((parent, line.moneybird_id.is_none(), known, data)))
    })?;
    let Some((parent, is_new, known, data)) = request else {
        return Ok(None);
    };
    let parent_moneybird_id = parent
        .moneybird_id
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("Push the document before its lines"))?;

    let body = line_envelope(resource_type, lines, data);
    let response = administration.patch(&resource_type.resource_path(parent_moneybird_id), &body)?;

    db.transaction(|t| {
        if is_new {
            adopt_new_line(t, lines, line_id, &known, &response)?;
        }
        merge_response(t, resource_type, parent.id, &response)
    })?;
    Ok(Some(response))
}

/// Removes a line remotely with `_destroy` and merges the parent, which
/// deletes the local line too. Lines that were never pushed are only
/// deleted locally.
pub fn delete_line(
    administration: &dyn Administration,
    db: &Db,
    resource_type: &ResourceType,
    line_id: i64,
) -> Result<()> {
    let lines = writable_lines(resource_type)?;
    let (line, parent) = db.transaction(|t| line_and_parent(t, resource_type, lines, line_id))?;
    let (Some(line_moneybird_id), Some(parent_moneybird_id)) = (&line.moneybird_id, &parent.moneybird_id) else {
        db.transaction(|t| t.delete(lines.table, line_id))?;
        return Ok(());
    };

    let mut destroy = Map::new();
    destroy.insert("id".to_string(), Value::String(line_moneybird_id.clone()));
    destroy.insert("_destroy".to_string(), Value::Bool(true));
    let body = line_envelope(resource_type, lines, Value::Object(destroy));
    let response = administration.patch(&resource_type.resource_path(parent_moneybird_id), &body)?;

    db.transaction(|t| {
        merge_response(t, resource_type, parent.id, &response)?;
        t.delete(lines.table, line_id)?;
        Ok(())
    })
}

/// Applies a write response to row `local_id` unless the row already holds
/// a newer version, e.g. from a background pass that ran during the request.
/// A draft whose new remote id was already mirrored into another row is
/// folded into that row.
fn merge_response(
    txn: &DbTransaction,
    resource_type: &ResourceType,
    local_id: i64,
    response: &Resource,
) -> Result<()> {
    let remote_id = resource_id(response)
        .ok_or_else(|| anyhow::anyhow!("{} write response has no id", resource_type.entity_type))?;
    let Some(mut record) = txn.get(resource_type.table, local_id)? else {
        log::warn!(
            "{} row {} was deleted while pushing, dropping the response",
            resource_type.entity_type,
            local_id
        );
        return Ok(());
    };
    if record.moneybird_id.is_none() {
        match txn.find_by_moneybird_id(resource_type.table, resource_type.scope, &remote_id)? {
            Some(synced) if synced.id != local_id => {
                log::info!(
                    "{} {} was mirrored as row {} during the push, dropping draft row {}",
                    resource_type.entity_type,
                    remote_id,
                    synced.id,
                    local_id
                );
                txn.delete(resource_type.table, local_id)?;
                record = synced;
            }
            _ => {
                let mut link = Fields::new();
                link.insert("moneybird_id".to_string(), Value::String(remote_id.clone()));
                txn.update(resource_type.table, local_id, &link)?;
            }
        }
    }
    if let (Some(stored), Some(received)) = (record.moneybird_version, resource_version(response)) {
        if received < stored {
            log::info!(
                "Keeping {} {} at version {}, response had {}",
                resource_type.entity_type,
                remote_id,
                stored,
                received
            );
            return Ok(());
        }
    }
    save_resource_returning_id(txn, resource_type, response)?;
    Ok(())
}

/// Links a freshly pushed draft line to the one line id the response added.
fn adopt_new_line(
    txn: &DbTransaction,
    lines: &DocumentLines,
    line_id: i64,
    known: &HashSet<ResourceId>,
    response: &Resource,
) -> Result<()> {
    let added: Vec<ResourceId> = lines
        .lines(response)
        .iter()
        .filter_map(resource_id)
        .filter(|id| !known.contains(id))
        .collect();
    match added.as_slice() {
        [id] => {
            let mut link = Fields::new();
            link.insert("moneybird_id".to_string(), Value::String(id.clone()));
            txn.update(lines.table, line_id, &link)
        }
        _ => {
            log::warn!(
                "Could not tell which of {} new lines is line {}, replacing it",
                added.len(),
                line_id
            );
            txn.delete(lines.table, line_id)?;
            Ok(())
        }
    }
}

fn owned_record(txn: &DbTransaction, resource_type: &ResourceType, local_id: i64) -> Result<LocalRecord> {
    txn.get(resource_type.table, local_id)?
        .filter(|record| resource_type.owns(record))
        .ok_or_else(|| anyhow::anyhow!("No {} with local id {}", resource_type.entity_type, local_id))
}

fn line_and_parent(
    txn: &DbTransaction,
    resource_type: &ResourceType,
    lines: &DocumentLines,
    line_id: i64,
) -> Result<(LocalRecord, LocalRecord)> {
    let line = txn
        .get(lines.table, line_id)?
        .ok_or_else(|| anyhow::anyhow!("No line with local id {} in {}", line_id, lines.table))?;
    let parent_id = line
        .get_i64(lines.document_foreign_key)
        .ok_or_else(|| anyhow::anyhow!("Line {} has no document", line_id))?;
    let parent = owned_record(txn, resource_type, parent_id)?;
    Ok((line, parent))
}

fn writable_lines(resource_type: &ResourceType) -> Result<&DocumentLines> {
    if !resource_type.can_write {
        anyhow::bail!("{} is read-only", resource_type.entity_type);
    }
    resource_type
        .document_lines
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("{} has no lines", resource_type.entity_type))
}

fn serialize(
    txn: &DbTransaction,
    serialize: crate::resource_type::SerializeFn,
    record: &LocalRecord,
) -> Result<Option<Resource>> {
    Ok(serialize(txn, record)?.filter(|data| !data.as_object().is_some_and(Map::is_empty)))
}

fn drafts(txn: &DbTransaction, lines: &DocumentLines, document_id: i64) -> Result<Vec<LocalRecord>> {
    Ok(txn
        .records_where(lines.table, lines.document_foreign_key, document_id)?
        .into_iter()
        .filter(|line| line.moneybird_id.is_none())
        .collect())
}

fn draft_lines(txn: &DbTransaction, lines: &DocumentLines, document_id: i64) -> Result<Vec<Value>> {
    let mut payloads = Vec::new();
    for line in drafts(txn, lines, document_id)? {
        if let Some(data) = serialize(txn, lines.serialize, &line)? {
            payloads.push(data);
        }
    }
    Ok(payloads)
}

fn synced_line_ids(txn: &DbTransaction, lines: &DocumentLines, document_id: i64) -> Result<HashSet<ResourceId>> {
    Ok(txn
        .records_where(lines.table, lines.document_foreign_key, document_id)?
        .into_iter()
        .filter_map(|line| line.moneybird_id)
        .collect())
}

/// `{"purchase_invoice": {...}}`
fn envelope(entity_type_name: &str, data: Value) -> Value {
    let mut body = Map::new();
    body.insert(entity_type_name.to_string(), data);
    Value::Object(body)
}

/// `{"purchase_invoice": {"details_attributes": [line]}}`
fn line_envelope(resource_type: &ResourceType, lines: &DocumentLines, line: Value) -> Value {
    envelope(
        resource_type.entity_type_name,
        envelope(lines.attributes_name, Value::Array(vec![line])),
    )
}

//! Applies a [`ResourceDiff`] to the local tables of one resource type.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{Db, DbTransaction};
use crate::resource::{resource_id, Resource, ResourceDiff, ResourceId};
use crate::resource_type::{DocumentLines, ResourceType};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Records whose mapping or write failed and were left untouched.
    pub skipped: usize,
}

impl ApplyReport {
    pub fn merge(&mut self, other: &ApplyReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
    }

    pub fn is_empty(&self) -> bool {
        *self == ApplyReport::default()
    }
}

enum Applied {
    Created,
    Updated,
}

/// Applies added, then changed, then removed resources. Every parent record
/// is written in its own transaction together with its lines and
/// `after_save` hook; a failing record is rolled back, logged and counted as
/// skipped while the rest of the diff continues.
pub fn apply_diff(db: &Db, resource_type: &ResourceType, diff: &ResourceDiff) -> Result<ApplyReport> {
    let (report, _) = apply_diff_reporting_skipped(db, resource_type, diff)?;
    Ok(report)
}

/// Like [`apply_diff`], also returning the remote ids that were skipped.
pub(crate) fn apply_diff_reporting_skipped(
    db: &Db,
    resource_type: &ResourceType,
    diff: &ResourceDiff,
) -> Result<(ApplyReport, Vec<ResourceId>)> {
    let mut report = ApplyReport::default();
    let mut skipped = Vec::new();

    for resource in diff.added.iter().chain(diff.changed.iter()) {
        match db.transaction(|t| save_resource(t, resource_type, resource)) {
            Ok(Applied::Created) => report.created += 1,
            Ok(Applied::Updated) => report.updated += 1,
            Err(e) => {
                let moneybird_id = resource_id(resource).unwrap_or_default();
                log::warn!("Skipping {} {}: {:#}", resource_type.entity_type, moneybird_id, e);
                report.skipped += 1;
                skipped.push(moneybird_id);
            }
        }
    }

    for moneybird_id in &diff.removed {
        match db.transaction(|t| delete_resource(t, resource_type, moneybird_id)) {
            Ok(true) => report.deleted += 1,
            Ok(false) => {}
            Err(e) => {
                log::warn!(
                    "Skipping removal of {} {}: {:#}",
                    resource_type.entity_type,
                    moneybird_id,
                    e
                );
                report.skipped += 1;
                skipped.push(moneybird_id.clone());
            }
        }
    }

    log::debug!(
        "APPLY {}: created={}, updated={}, deleted={}, skipped={}",
        resource_type.entity_type,
        report.created,
        report.updated,
        report.deleted,
        report.skipped
    );
    Ok((report, skipped))
}

/// Inserts or fully replaces the row mirroring `resource`, then reconciles
/// its lines. Returns the local id.
pub(crate) fn save_resource_returning_id(
    txn: &DbTransaction,
    resource_type: &ResourceType,
    resource: &Resource,
) -> Result<i64> {
    let (_, id) = upsert(txn, resource_type, resource)?;
    Ok(id)
}

fn save_resource(txn: &DbTransaction, resource_type: &ResourceType, resource: &Resource) -> Result<Applied> {
    let (applied, _) = upsert(txn, resource_type, resource)?;
    Ok(applied)
}

fn upsert(txn: &DbTransaction, resource_type: &ResourceType, resource: &Resource) -> Result<(Applied, i64)> {
    let moneybird_id = resource_id(resource)
        .ok_or_else(|| anyhow::anyhow!("{} payload has no id", resource_type.entity_type))?;
    let fields = resource_type.record_fields(txn, resource)?;

    let existing = txn.find_by_moneybird_id(resource_type.table, resource_type.scope, &moneybird_id)?;
    let (applied, id) = match existing {
        Some(record) => {
            txn.update(resource_type.table, record.id, &fields)?;
            (Applied::Updated, record.id)
        }
        None => (Applied::Created, txn.insert(resource_type.table, &fields)?),
    };

    if let Some(document_lines) = &resource_type.document_lines {
        reconcile_lines(txn, document_lines, resource, id)?;
    }
    if let Some(after_save) = resource_type.after_save {
        after_save(txn, resource_type, id)?;
    }
    Ok((applied, id))
}

fn delete_resource(txn: &DbTransaction, resource_type: &ResourceType, moneybird_id: &str) -> Result<bool> {
    match txn.find_by_moneybird_id(resource_type.table, resource_type.scope, moneybird_id)? {
        Some(record) => txn.delete(resource_type.table, record.id),
        None => Ok(false),
    }
}

/// Makes the synced lines of `document_id` match the payload. Lines without
/// a remote id are local drafts and are left alone.
fn reconcile_lines(
    txn: &DbTransaction,
    document_lines: &DocumentLines,
    resource: &Resource,
    document_id: i64,
) -> Result<()> {
    let local: HashMap<ResourceId, i64> = txn
        .records_where(document_lines.table, document_lines.document_foreign_key, document_id)?
        .into_iter()
        .filter_map(|line| Some((line.moneybird_id?, line.id)))
        .collect();

    let mut seen = HashSet::new();
    for line in document_lines.lines(resource) {
        let line_id = resource_id(line)
            .ok_or_else(|| anyhow::anyhow!("Document line without an id: {}", line))?;
        let mut fields = (document_lines.model_fields)(txn, line)?;
        fields.insert("moneybird_id".to_string(), Value::String(line_id.clone()));
        fields.insert("moneybird_json".to_string(), Value::String(serde_json::to_string(line)?));
        fields.insert(document_lines.document_foreign_key.to_string(), Value::from(document_id));

        match local.get(&line_id) {
            Some(id) => txn.update(document_lines.table, *id, &fields)?,
            None => {
                txn.insert(document_lines.table, &fields)?;
            }
        }
        seen.insert(line_id);
    }

    for (line_id, id) in &local {
        if !seen.contains(line_id) {
            txn.delete(document_lines.table, *id)?;
        }
    }
    Ok(())
}

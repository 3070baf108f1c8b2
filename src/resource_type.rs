//! Descriptors that tell the sync engine how a remote resource type maps onto
//! a local table.

use std::fmt;

use anyhow::Result;
use serde_json::Value;

use crate::db::{DbTransaction, Fields, LocalRecord, Scope};
use crate::resource::{resource_id, resource_version, Resource};

/// Maps a remote payload to the type specific columns of its row. Must emit a
/// value (possibly null) for every column it owns so updates fully replace.
pub type ModelFieldsFn = fn(&DbTransaction, &Resource) -> Result<Fields>;

/// Produces the payload to write upstream, or `None` when there is nothing
/// to write.
pub type SerializeFn = fn(&DbTransaction, &LocalRecord) -> Result<Option<Resource>>;

/// Runs after a remote payload was applied to row `id`, in the same
/// transaction.
pub type AfterSaveFn = fn(&DbTransaction, &ResourceType, i64) -> Result<()>;

/// Line items nested inside a document payload.
#[derive(Clone, Copy)]
pub struct DocumentLines {
    pub table: &'static str,
    /// Column of the line table pointing at the parent row.
    pub document_foreign_key: &'static str,
    /// Key the remote nests the lines under, e.g. `details`.
    pub resource_data_name: &'static str,
    /// Key used to write lines, e.g. `details_attributes`.
    pub attributes_name: &'static str,
    pub model_fields: ModelFieldsFn,
    pub serialize: SerializeFn,
}

impl DocumentLines {
    /// The lines of a document payload. A missing key means no lines.
    pub fn lines<'r>(&self, resource: &'r Resource) -> &'r [Value] {
        resource
            .get(self.resource_data_name)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

#[derive(Clone, Copy)]
pub struct ResourceType {
    /// Remote entity type, as used in webhooks (`SalesInvoice`).
    pub entity_type: &'static str,
    /// Envelope key for writes (`sales_invoice`).
    pub entity_type_name: &'static str,
    pub api_path: &'static str,
    pub table: &'static str,
    pub scope: Scope,
    pub synchronizable: bool,
    pub can_write: bool,
    pub can_delete: bool,
    pub model_fields: ModelFieldsFn,
    pub serialize: SerializeFn,
    pub document_lines: Option<DocumentLines>,
    pub after_save: Option<AfterSaveFn>,
}

impl ResourceType {
    /// A read-only, non-synchronizable type. Use the builder methods to
    /// enable the rest.
    pub fn new(
        entity_type: &'static str,
        entity_type_name: &'static str,
        api_path: &'static str,
        table: &'static str,
        model_fields: ModelFieldsFn,
    ) -> Self {
        Self {
            entity_type,
            entity_type_name,
            api_path,
            table,
            scope: None,
            synchronizable: false,
            can_write: false,
            can_delete: false,
            model_fields,
            serialize: serialize_nothing,
            document_lines: None,
            after_save: None,
        }
    }

    pub fn synchronizable(mut self) -> Self {
        self.synchronizable = true;
        self
    }

    pub fn writable(mut self, serialize: SerializeFn) -> Self {
        self.can_write = true;
        self.serialize = serialize;
        self
    }

    pub fn deletable(mut self) -> Self {
        self.can_delete = true;
        self
    }

    pub fn scoped(mut self, column: &'static str, value: &'static str) -> Self {
        self.scope = Some((column, value));
        self
    }

    pub fn with_document_lines(mut self, document_lines: DocumentLines) -> Self {
        self.document_lines = Some(document_lines);
        self
    }

    pub fn with_after_save(mut self, after_save: AfterSaveFn) -> Self {
        self.after_save = Some(after_save);
        self
    }

    pub fn synchronization_path(&self) -> String {
        format!("{}/synchronization", self.api_path)
    }

    pub fn resource_path(&self, moneybird_id: &str) -> String {
        format!("{}/{}", self.api_path, moneybird_id)
    }

    /// Columns every mirrored row carries, derived from the payload alone.
    pub fn base_fields(&self, resource: &Resource) -> Result<Fields> {
        let id = resource_id(resource)
            .ok_or_else(|| anyhow::anyhow!("{} payload has no id", self.entity_type))?;
        let mut fields = Fields::new();
        fields.insert("moneybird_id".to_string(), Value::String(id));
        fields.insert(
            "moneybird_json".to_string(),
            Value::String(serde_json::to_string(resource)?),
        );
        if self.synchronizable {
            fields.insert(
                "moneybird_version".to_string(),
                resource_version(resource).map(Value::from).unwrap_or(Value::Null),
            );
        }
        if let Some((column, value)) = self.scope {
            fields.insert(column.to_string(), Value::from(value));
        }
        Ok(fields)
    }

    /// Base fields merged with the type's own mapping. Base keys win.
    pub fn record_fields(&self, txn: &DbTransaction, resource: &Resource) -> Result<Fields> {
        let mut fields = (self.model_fields)(txn, resource)?;
        fields.extend(self.base_fields(resource)?);
        Ok(fields)
    }

    /// True when `record` is a row of this type.
    pub fn owns(&self, record: &LocalRecord) -> bool {
        match self.scope {
            Some((column, value)) => record.get_str(column) == Some(value),
            None => true,
        }
    }
}

impl fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceType")
            .field("entity_type", &self.entity_type)
            .field("api_path", &self.api_path)
            .field("table", &self.table)
            .field("scope", &self.scope)
            .field("synchronizable", &self.synchronizable)
            .finish()
    }
}

fn serialize_nothing(_txn: &DbTransaction, _record: &LocalRecord) -> Result<Option<Resource>> {
    Ok(None)
}

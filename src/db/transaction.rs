use anyhow::Result;
use rusqlite::{types::ValueRef, Params, Row, Transaction};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::db::{Fields, LocalRecord};
use crate::resource::{ResourceId, VersionMap};

/// `(column, value)` restricting a shared table to one resource type, e.g.
/// `("document_kind", "PI")`.
pub type Scope = Option<(&'static str, &'static str)>;

pub struct DbTransaction<'a> {
    txn: &'a Transaction<'a>,
}

impl<'a> DbTransaction<'a> {
    pub(crate) fn new(txn: &'a Transaction<'a>) -> Self {
        Self { txn }
    }

    pub fn connection(&self) -> &rusqlite::Connection {
        self.txn
    }

    pub fn query<T: DeserializeOwned, P: Params>(&self, sql: &str, params: P) -> Result<Vec<T>> {
        let mut stmt = self.txn.prepare(sql)?;
        let rows = serde_rusqlite::from_rows::<T>(stmt.query(params)?)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Reads rows without a fixed shape.
    pub fn query_records<P: Params>(&self, sql: &str, params: P) -> Result<Vec<LocalRecord>> {
        let mut stmt = self.txn.prepare(sql)?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query(params)?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(LocalRecord::from_fields(row_fields(row, &column_names)?)?);
        }
        Ok(records)
    }

    pub fn get(&self, table: &str, id: i64) -> Result<Option<LocalRecord>> {
        let sql = format!("SELECT * FROM {} WHERE id = ? LIMIT 1", table);
        Ok(self.query_records(&sql, [id])?.into_iter().next())
    }

    pub fn find_by_moneybird_id(
        &self,
        table: &str,
        scope: Scope,
        moneybird_id: &str,
    ) -> Result<Option<LocalRecord>> {
        let records = match scope {
            Some((column, value)) => {
                let sql = format!(
                    "SELECT * FROM {} WHERE moneybird_id = ? AND {} = ? LIMIT 1",
                    table, column
                );
                self.query_records(&sql, [moneybird_id, value])?
            }
            None => {
                let sql = format!("SELECT * FROM {} WHERE moneybird_id = ? LIMIT 1", table);
                self.query_records(&sql, [moneybird_id])?
            }
        };
        Ok(records.into_iter().next())
    }

    /// Rows of `table` whose `column` equals `value`, in id order.
    pub fn records_where(&self, table: &str, column: &str, value: i64) -> Result<Vec<LocalRecord>> {
        let sql = format!("SELECT * FROM {} WHERE {} = ? ORDER BY id", table, column);
        self.query_records(&sql, [value])
    }

    /// Remote id to local version for every synced row of a resource type.
    pub fn version_map(&self, table: &str, scope: Scope) -> Result<VersionMap> {
        #[derive(serde::Deserialize)]
        struct VersionRow {
            moneybird_id: String,
            moneybird_version: Option<i64>,
        }

        let (sql, scope_value) = scoped_select(
            "moneybird_id, moneybird_version",
            table,
            scope,
        );
        let rows: Vec<VersionRow> = match scope_value {
            Some(value) => self.query(&sql, [value])?,
            None => self.query(&sql, [])?,
        };
        Ok(rows
            .into_iter()
            .map(|row| (row.moneybird_id, row.moneybird_version))
            .collect())
    }

    pub fn moneybird_ids(&self, table: &str, scope: Scope) -> Result<Vec<ResourceId>> {
        #[derive(serde::Deserialize)]
        struct IdRow {
            moneybird_id: String,
        }

        let (sql, scope_value) = scoped_select("moneybird_id", table, scope);
        let rows: Vec<IdRow> = match scope_value {
            Some(value) => self.query(&sql, [value])?,
            None => self.query(&sql, [])?,
        };
        Ok(rows.into_iter().map(|row| row.moneybird_id).collect())
    }

    /// Forgets the synced versions of a resource type so the next pass
    /// fetches every resource again.
    pub fn reset_versions(&self, table: &str, scope: Scope) -> Result<usize> {
        let count = match scope {
            Some((column, value)) => self.txn.execute(
                &format!("UPDATE {} SET moneybird_version = NULL WHERE {} = ?", table, column),
                [value],
            )?,
            None => self.txn.execute(
                &format!("UPDATE {} SET moneybird_version = NULL", table),
                [],
            )?,
        };
        Ok(count)
    }

    /// Inserts the fields that have a matching column and returns the new
    /// row id. Unknown keys are ignored.
    pub fn insert(&self, table: &str, fields: &Fields) -> Result<i64> {
        let columns = self.writable_columns(table, fields)?;
        if columns.is_empty() {
            self.txn
                .execute(&format!("INSERT INTO {} DEFAULT VALUES", table), [])?;
            return Ok(self.txn.last_insert_rowid());
        }
        let placeholders = columns
            .iter()
            .map(|col| format!(":{}", col))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders
        );
        self.execute_with_named_params(&sql, &Value::Object(fields.clone()), &columns)?;
        Ok(self.txn.last_insert_rowid())
    }

    /// Updates the given fields of row `id`. Columns not in `fields` keep
    /// their value.
    pub fn update(&self, table: &str, id: i64, fields: &Fields) -> Result<()> {
        let columns = self.writable_columns(table, fields)?;
        if columns.is_empty() {
            return Ok(());
        }
        let set_clause = columns
            .iter()
            .map(|col| format!("{} = :{}", col, col))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("UPDATE {} SET {} WHERE id = :id", table, set_clause);

        let mut value = fields.clone();
        value.insert("id".to_string(), Value::from(id));
        let mut named = columns;
        named.push("id".to_string());
        self.execute_with_named_params(&sql, &Value::Object(value), &named)
    }

    pub fn delete(&self, table: &str, id: i64) -> Result<bool> {
        let count = self
            .txn
            .execute(&format!("DELETE FROM {} WHERE id = ?", table), [id])?;
        Ok(count > 0)
    }

    /// Local id of the row mirroring `moneybird_id`, inserting an unsynced
    /// placeholder row when the referenced resource has not arrived yet.
    pub fn resolve_reference(&self, table: &str, scope: Scope, moneybird_id: &str) -> Result<i64> {
        if let Some(record) = self.find_by_moneybird_id(table, scope, moneybird_id)? {
            return Ok(record.id);
        }
        let mut fields = Fields::new();
        fields.insert("moneybird_id".to_string(), Value::from(moneybird_id));
        if let Some((column, value)) = scope {
            fields.insert(column.to_string(), Value::from(value));
        }
        log::debug!(
            "Creating placeholder row in {} for unsynced reference {}",
            table,
            moneybird_id
        );
        self.insert(table, &fields)
    }

    pub fn table_column_names(&self, table: &str) -> Result<Vec<String>> {
        let mut stmt = self.txn.prepare(&format!("PRAGMA table_info({})", table))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        if columns.is_empty() {
            return Err(anyhow::anyhow!("Table '{}' not found or has no columns", table));
        }
        Ok(columns)
    }

    fn writable_columns(&self, table: &str, fields: &Fields) -> Result<Vec<String>> {
        Ok(self
            .table_column_names(table)?
            .into_iter()
            .filter(|col| col != "id" && fields.contains_key(col))
            .collect())
    }

    fn execute_with_named_params(&self, sql: &str, value: &Value, column_names: &[String]) -> Result<()> {
        let mut stmt = self.txn.prepare(sql)?;
        let str_refs: Vec<&str> = column_names.iter().map(|s| s.as_str()).collect();
        let params = serde_rusqlite::to_params_named_with_fields(value, &str_refs)?;
        stmt.execute(params.to_slice().as_slice())?;
        Ok(())
    }
}

fn scoped_select(columns: &str, table: &str, scope: Scope) -> (String, Option<&'static str>) {
    match scope {
        Some((column, value)) => (
            format!(
                "SELECT {} FROM {} WHERE moneybird_id IS NOT NULL AND {} = ?",
                columns, table, column
            ),
            Some(value),
        ),
        None => (
            format!("SELECT {} FROM {} WHERE moneybird_id IS NOT NULL", columns, table),
            None,
        ),
    }
}

fn row_fields(row: &Row, column_names: &[String]) -> Result<Fields> {
    let mut fields = Fields::new();
    for (index, name) in column_names.iter().enumerate() {
        let value = match row.get_ref(index)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::from(i),
            ValueRef::Real(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
            ValueRef::Blob(blob) => Value::from(blob.to_vec()),
        };
        fields.insert(name.clone(), value);
    }
    Ok(fields)
}

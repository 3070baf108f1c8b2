use serde_json::{Map, Value};

use crate::resource::{ResourceId, ResourceVersion};

/// Column name to value, as written to or read from a local table.
pub type Fields = Map<String, Value>;

/// A row of a local table that mirrors remote resources.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalRecord {
    pub id: i64,
    pub moneybird_id: Option<ResourceId>,
    pub moneybird_version: Option<ResourceVersion>,
    /// Every column of the row, including the ones above.
    pub fields: Fields,
}

impl LocalRecord {
    pub fn from_fields(fields: Fields) -> anyhow::Result<Self> {
        let id = fields
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| anyhow::anyhow!("Row has no integer id"))?;
        let moneybird_id = fields
            .get("moneybird_id")
            .and_then(crate::resource::id_from_value);
        let moneybird_version = fields.get("moneybird_version").and_then(Value::as_i64);
        Ok(Self {
            id,
            moneybird_id,
            moneybird_version,
            fields,
        })
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.fields.get(column).and_then(Value::as_str)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.fields.get(column).and_then(Value::as_i64)
    }

    /// The last remote payload applied to this row.
    pub fn moneybird_json(&self) -> Option<Value> {
        self.get_str("moneybird_json")
            .and_then(|json| serde_json::from_str(json).ok())
    }
}

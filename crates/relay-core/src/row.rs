//! Row and snapshot representations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single record: column name to value.
///
/// Values are carried opaquely as JSON. The engine never interprets them
/// beyond what the database needs to accept them back.
pub type Row = serde_json::Map<String, Value>;

/// The captured contents of one table at export time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSnapshot {
    pub table_name: String,
    pub exported_at: DateTime<Utc>,
    pub rows: Vec<Row>,
}

impl TableSnapshot {
    pub fn new(table_name: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            table_name: table_name.into(),
            exported_at: Utc::now(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Render a JSON value the way PostgreSQL renders it with `::text`.
///
/// Used to compare identifiers that may be stored as integers, UUIDs or
/// strings without knowing the column type.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

//! Export summary and import error log records.

use chrono::{DateTime, Utc};
use relay_core::Row;
use serde::{Deserialize, Serialize};

/// Row count (or failure) for one exported table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableExportSummary {
    pub table: String,
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What one export run captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub date: DateTime<Utc>,
    pub total_records: u64,
    pub per_table: Vec<TableExportSummary>,
}

impl ExportSummary {
    pub fn new(per_table: Vec<TableExportSummary>) -> Self {
        Self {
            date: Utc::now(),
            total_records: per_table.iter().map(|t| t.count).sum(),
            per_table,
        }
    }

    pub fn failed_tables(&self) -> impl Iterator<Item = &TableExportSummary> {
        self.per_table.iter().filter(|t| t.error.is_some())
    }

    pub fn table(&self, name: &str) -> Option<&TableExportSummary> {
        self.per_table.iter().find(|t| t.table == name)
    }
}

/// A row the importer could not write, kept for follow-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLogEntry {
    pub table: String,
    pub row: Row,
    pub error_message: String,
}

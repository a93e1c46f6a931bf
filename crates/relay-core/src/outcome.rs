//! Import results and run status.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::row::Row;

/// What the importer does when a row's primary key already exists on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Leave the existing row alone and count the incoming one as skipped.
    #[default]
    #[serde(alias = "skip")]
    SkipOnConflict,
    /// Treat the conflict as a row error.
    #[serde(alias = "fail")]
    FailOnConflict,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::SkipOnConflict => "skip-on-conflict",
            ConflictPolicy::FailOnConflict => "fail-on-conflict",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" | "skip-on-conflict" => Ok(ConflictPolicy::SkipOnConflict),
            "fail" | "fail-on-conflict" => Ok(ConflictPolicy::FailOnConflict),
            other => Err(format!(
                "unknown conflict policy '{other}' (expected 'skip' or 'fail')"
            )),
        }
    }
}

/// Result of a single row insert that the database accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with the same primary key already existed and was left untouched.
    Conflict,
}

/// A row the target rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    pub row: Row,
    pub error_message: String,
    pub conflict: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TableImportStatus {
    Imported,
    /// No snapshot artifact was found for the table.
    SkippedMissingSnapshot,
    SkippedEmpty,
    /// The target already held at least as many rows as the snapshot.
    #[serde(rename_all = "camelCase")]
    SkippedAlreadyPopulated { target_count: u64 },
    /// The table could not be imported at all, e.g. it is missing on the target.
    Failed { reason: String },
}

/// Per-table result of an import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub table_name: String,
    pub status: TableImportStatus,
    pub rows_attempted: usize,
    pub rows_inserted: usize,
    pub rows_skipped: usize,
    pub errors: Vec<RowError>,
}

impl ImportOutcome {
    pub fn new(table_name: impl Into<String>, status: TableImportStatus) -> Self {
        Self {
            table_name: table_name.into(),
            status,
            rows_attempted: 0,
            rows_inserted: 0,
            rows_skipped: 0,
            errors: Vec::new(),
        }
    }

    pub fn rows_failed(&self) -> usize {
        self.errors.len()
    }

    /// Every attempted row was either inserted or skipped as a conflict.
    pub fn is_complete(&self) -> bool {
        self.rows_inserted + self.rows_skipped == self.rows_attempted
    }

    pub fn has_warnings(&self) -> bool {
        !self.errors.is_empty() || matches!(self.status, TableImportStatus::Failed { .. })
    }
}

/// Overall status of a step or of a composed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Succeeded,
    SucceededWithWarnings,
    Failed,
}

impl RunStatus {
    pub fn from_warnings(has_warnings: bool) -> Self {
        if has_warnings {
            RunStatus::SucceededWithWarnings
        } else {
            RunStatus::Succeeded
        }
    }

    /// The worse of two statuses.
    pub fn combine(self, other: RunStatus) -> RunStatus {
        self.max(other)
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Succeeded => 0,
            RunStatus::Failed => 1,
            RunStatus::SucceededWithWarnings => 2,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::SucceededWithWarnings => "succeeded with warnings",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_policy_parsing() {
        assert_eq!(
            "skip".parse::<ConflictPolicy>().unwrap(),
            ConflictPolicy::SkipOnConflict
        );
        assert_eq!(
            "Fail-On-Conflict".parse::<ConflictPolicy>().unwrap(),
            ConflictPolicy::FailOnConflict
        );
        assert!("overwrite".parse::<ConflictPolicy>().is_err());
    }

    #[test]
    fn test_conflict_policy_serde_accepts_short_alias() {
        let policy: ConflictPolicy = serde_json::from_str("\"fail\"").unwrap();
        assert_eq!(policy, ConflictPolicy::FailOnConflict);
        assert_eq!(
            serde_json::to_string(&ConflictPolicy::SkipOnConflict).unwrap(),
            "\"skip-on-conflict\""
        );
    }

    #[test]
    fn test_outcome_completeness() {
        let mut outcome = ImportOutcome::new("users", TableImportStatus::Imported);
        outcome.rows_attempted = 10;
        outcome.rows_inserted = 9;
        assert!(!outcome.is_complete());

        outcome.errors.push(RowError {
            row: Row::new(),
            error_message: "null value in column \"email\"".to_string(),
            conflict: false,
        });
        assert_eq!(outcome.rows_failed(), 1);
        assert!(outcome.has_warnings());

        outcome.rows_skipped = 1;
        outcome.errors.clear();
        assert!(outcome.is_complete());
        assert!(!outcome.has_warnings());
    }

    #[test]
    fn test_run_status_combination() {
        assert_eq!(
            RunStatus::Succeeded.combine(RunStatus::SucceededWithWarnings),
            RunStatus::SucceededWithWarnings
        );
        assert_eq!(
            RunStatus::SucceededWithWarnings.combine(RunStatus::Failed),
            RunStatus::Failed
        );
        assert_eq!(RunStatus::SucceededWithWarnings.exit_code(), 2);
    }

    #[test]
    fn test_status_serializes_with_kind_tag() {
        let status = TableImportStatus::SkippedAlreadyPopulated { target_count: 12 };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["kind"], "skippedAlreadyPopulated");
        assert_eq!(value["targetCount"], 12);
    }
}

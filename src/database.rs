//! Storage traits the migration steps are written against.
//!
//! The steps never talk to a driver directly. Production runs use the
//! PostgreSQL implementation in [`crate::postgresql`]; tests use
//! [`crate::testing::MemoryDatabase`].

use async_trait::async_trait;
use relay_core::{ConflictPolicy, DatabaseError, InsertOutcome, Row, TableSchema};
use serde::{Deserialize, Serialize};

/// A relational database acting as migration source or target.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Role of this connection ("source" or "target"), used in logs and errors.
    fn label(&self) -> &str;

    /// Names of all user tables in the configured schema, sorted.
    async fn list_tables(&self) -> Result<Vec<String>, DatabaseError>;

    /// Columns, keys and indexes of one table.
    ///
    /// Returns [`DatabaseError::TableNotFound`] if the table does not exist.
    async fn describe_table(&self, table: &str) -> Result<TableSchema, DatabaseError>;

    async fn table_exists(&self, table: &str) -> Result<bool, DatabaseError>;

    /// Every row of a table, ordered by primary key when the table has one.
    async fn fetch_rows(&self, table: &str) -> Result<Vec<Row>, DatabaseError>;

    async fn count_rows(&self, table: &str) -> Result<u64, DatabaseError>;

    /// Create a table (and its indexes) from an introspected schema.
    async fn create_table(&self, schema: &TableSchema) -> Result<(), DatabaseError>;

    /// Insert one row.
    ///
    /// A rejected row is reported as [`DatabaseError::Row`]; a duplicate key
    /// under [`ConflictPolicy::SkipOnConflict`] is `Ok(InsertOutcome::Conflict)`.
    async fn insert_row(
        &self,
        table: &str,
        row: &Row,
        policy: ConflictPolicy,
    ) -> Result<InsertOutcome, DatabaseError>;

    /// Move sequence-backed columns past the highest stored value.
    async fn sync_sequences(&self, table: &str) -> Result<(), DatabaseError>;
}

/// Physical layout of the analytics tables touched by consolidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationTables {
    pub targets_table: String,
    pub id_column: String,
    pub type_column: String,
    pub name_column: String,
    pub referenced_entity_column: String,
    pub events_table: String,
    /// Column in the events table referencing the target id.
    pub event_target_column: String,
}

impl Default for ConsolidationTables {
    fn default() -> Self {
        Self {
            targets_table: "analytics_targets".to_string(),
            id_column: "id".to_string(),
            type_column: "target_type".to_string(),
            name_column: "target_name".to_string(),
            referenced_entity_column: "referenced_entity_id".to_string(),
            events_table: "click_events".to_string(),
            event_target_column: "target_id".to_string(),
        }
    }
}

/// An entity that click events are attributed to.
///
/// Ids are kept in their text form so integer and UUID keys are handled
/// the same way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsTarget {
    pub id: String,
    pub target_type: String,
    pub target_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_entity_id: Option<String>,
}

/// Fold `duplicate_ids` into `canonical_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMerge {
    pub logical_name: String,
    pub canonical_id: String,
    pub duplicate_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedMerge {
    pub logical_name: String,
    pub canonical_id: String,
    pub removed_ids: Vec<String>,
    pub clicks_repointed: u64,
    /// Clicks on the canonical target once the group is merged.
    pub clicks_total: u64,
}

/// Storage for the analytics tables.
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn load_targets(
        &self,
        tables: &ConsolidationTables,
        target_type: &str,
    ) -> Result<Vec<AnalyticsTarget>, DatabaseError>;

    /// Apply every merge in one transaction.
    ///
    /// For each merge, events pointing at a duplicate are repointed to the
    /// canonical target and the duplicate is deleted. If any statement
    /// fails, or a group's click count changes, nothing is applied.
    async fn apply_merges(
        &self,
        tables: &ConsolidationTables,
        merges: &[GroupMerge],
    ) -> Result<Vec<AppliedMerge>, DatabaseError>;
}

//! In-memory database for exercising the migration steps without a server
//!
//! [`MemoryDatabase`] enforces the constraints the steps depend on:
//! primary keys, unique indexes, NOT NULL columns, foreign keys and
//! unknown columns. Errors use the same [`DatabaseError`] classes the
//! PostgreSQL backend produces, so step-level error handling is tested
//! the same way it runs in production.

use async_trait::async_trait;
use relay_core::{
    value_to_text, ConflictPolicy, DatabaseError, InsertOutcome, Row, TableSchema,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::database::{
    AnalyticsStore, AnalyticsTarget, AppliedMerge, ConsolidationTables, GroupMerge,
    RelationalStore,
};
use crate::pipeline::Connector;

#[derive(Debug, Clone)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<Row>,
    next_serial: i64,
}

impl MemoryTable {
    fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
            next_serial: 1,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
    calls: Vec<String>,
    disconnected: bool,
    unreadable: BTreeSet<String>,
    undeletable: BTreeSet<String>,
}

/// A cheaply cloneable handle; clones share the same tables.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    label: String,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDatabase {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    pub fn with_table(self, schema: TableSchema) -> Self {
        self.add_table(schema);
        self
    }

    pub fn add_table(&self, schema: TableSchema) {
        self.lock()
            .tables
            .insert(schema.name.clone(), MemoryTable::new(schema));
    }

    pub fn drop_table(&self, table: &str) -> bool {
        self.lock().tables.remove(table).is_some()
    }

    /// Store rows as-is, bypassing every constraint.
    pub fn insert_fixture_rows(&self, table: &str, rows: impl IntoIterator<Item = Row>) {
        let mut state = self.lock();
        if let Some(entry) = state.tables.get_mut(table) {
            entry.rows.extend(rows);
        }
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, |t| t.rows.len())
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.lock().tables.contains_key(table)
    }

    /// Value the next sequence-generated id of `table` would get.
    pub fn next_serial(&self, table: &str) -> Option<i64> {
        self.lock().tables.get(table).map(|t| t.next_serial)
    }

    /// Every call made so far, as `"<operation>:<table>"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Tables in the order their first row was inserted.
    pub fn insert_order(&self) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        for call in self.lock().calls.iter() {
            if let Some(table) = call.strip_prefix("insert_row:") {
                if !order.iter().any(|t| t == table) {
                    order.push(table.to_string());
                }
            }
        }
        order
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Make every further call fail as if the server went away.
    pub fn disconnect(&self) {
        self.lock().disconnected = true;
    }

    /// Make reads of `table` fail with a query error.
    pub fn fail_reads_of(&self, table: &str) {
        self.lock().unreadable.insert(table.to_string());
    }

    /// Make deleting the analytics target `id` fail during a merge.
    pub fn fail_delete_of(&self, id: &str) {
        self.lock().undeletable.insert(id.to_string());
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock, record the call and check the connection.
    fn enter(
        &self,
        operation: &str,
        table: &str,
    ) -> Result<MutexGuard<'_, MemoryState>, DatabaseError> {
        let mut state = self.lock();
        state.calls.push(format!("{operation}:{table}"));
        if state.disconnected {
            return Err(DatabaseError::connection(&self.label, "connection closed"));
        }
        Ok(state)
    }
}

fn missing(table: &str) -> DatabaseError {
    DatabaseError::TableNotFound {
        table: table.to_string(),
    }
}

fn same_key(a: &Row, b: &Row, columns: &[String]) -> bool {
    columns.iter().all(|c| {
        let left = a.get(c).unwrap_or(&Value::Null);
        !left.is_null() && Some(left) == b.get(c)
    })
}

/// Fill defaults and check every constraint of `table` except the primary key.
fn prepare_row(
    tables: &BTreeMap<String, MemoryTable>,
    table: &MemoryTable,
    row: &Row,
) -> Result<Row, DatabaseError> {
    let name = &table.schema.name;
    if let Some(unknown) = row.keys().find(|k| table.schema.column(k).is_none()) {
        return Err(DatabaseError::row(format!(
            "column \"{unknown}\" of relation \"{name}\" does not exist"
        )));
    }

    let mut stored = Row::new();
    let mut next_serial = table.next_serial;
    for column in &table.schema.columns {
        let value = match row.get(&column.name) {
            Some(value) => value.clone(),
            None if column.is_sequence_backed() => {
                let value = Value::from(next_serial);
                next_serial += 1;
                value
            }
            None => Value::Null,
        };
        let defaulted = !row.contains_key(&column.name)
            && (column.default.is_some() || column.is_generated());
        if value.is_null() && !column.nullable && !defaulted {
            return Err(DatabaseError::row(format!(
                "null value in column \"{}\" of relation \"{name}\" violates not-null constraint",
                column.name
            )));
        }
        stored.insert(column.name.clone(), value);
    }

    for index in table.schema.indexes.iter().filter(|i| i.unique) {
        if table.rows.iter().any(|r| same_key(&stored, r, &index.columns)) {
            return Err(DatabaseError::conflict(format!(
                "duplicate key value violates unique constraint \"{}\"",
                index.name
            )));
        }
    }

    for fk in &table.schema.foreign_keys {
        if fk.columns.iter().any(|c| stored.get(c).map_or(true, Value::is_null)) {
            continue;
        }
        let referenced = tables.get(&fk.referenced_table);
        let found = referenced.is_some_and(|parent| {
            parent.rows.iter().any(|candidate| {
                fk.columns
                    .iter()
                    .zip(&fk.referenced_columns)
                    .all(|(c, p)| stored.get(c) == candidate.get(p))
            })
        });
        if !found {
            return Err(DatabaseError::row(format!(
                "insert or update on table \"{name}\" violates foreign key constraint \"{}\"",
                fk.name
            )));
        }
    }

    Ok(stored)
}

#[async_trait]
impl RelationalStore for MemoryDatabase {
    fn label(&self) -> &str {
        &self.label
    }

    async fn list_tables(&self) -> Result<Vec<String>, DatabaseError> {
        let state = self.enter("list_tables", "*")?;
        Ok(state.tables.keys().cloned().collect())
    }

    async fn describe_table(&self, table: &str) -> Result<TableSchema, DatabaseError> {
        let state = self.enter("describe_table", table)?;
        state
            .tables
            .get(table)
            .map(|t| t.schema.clone())
            .ok_or_else(|| missing(table))
    }

    async fn table_exists(&self, table: &str) -> Result<bool, DatabaseError> {
        let state = self.enter("table_exists", table)?;
        Ok(state.tables.contains_key(table))
    }

    async fn fetch_rows(&self, table: &str) -> Result<Vec<Row>, DatabaseError> {
        let state = self.enter("fetch_rows", table)?;
        if state.unreadable.contains(table) {
            return Err(DatabaseError::Query {
                table: table.to_string(),
                message: "permission denied".to_string(),
            });
        }
        state
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .ok_or_else(|| missing(table))
    }

    async fn count_rows(&self, table: &str) -> Result<u64, DatabaseError> {
        let state = self.enter("count_rows", table)?;
        state
            .tables
            .get(table)
            .map(|t| t.rows.len() as u64)
            .ok_or_else(|| missing(table))
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<(), DatabaseError> {
        let mut state = self.enter("create_table", &schema.name)?;
        if state.tables.contains_key(&schema.name) {
            return Ok(());
        }
        for fk in &schema.foreign_keys {
            if fk.referenced_table != schema.name && !state.tables.contains_key(&fk.referenced_table)
            {
                return Err(DatabaseError::Query {
                    table: schema.name.clone(),
                    message: format!("relation \"{}\" does not exist", fk.referenced_table),
                });
            }
        }
        state
            .tables
            .insert(schema.name.clone(), MemoryTable::new(schema.clone()));
        Ok(())
    }

    async fn insert_row(
        &self,
        table: &str,
        row: &Row,
        policy: ConflictPolicy,
    ) -> Result<InsertOutcome, DatabaseError> {
        let mut state = self.enter("insert_row", table)?;
        let entry = state.tables.get(table).ok_or_else(|| {
            DatabaseError::row(format!("relation \"{table}\" does not exist"))
        })?;

        let primary_key = &entry.schema.primary_key;
        let duplicate = !primary_key.is_empty()
            && entry.rows.iter().any(|r| same_key(row, r, primary_key));
        if duplicate {
            return match policy {
                ConflictPolicy::SkipOnConflict => Ok(InsertOutcome::Conflict),
                ConflictPolicy::FailOnConflict => Err(DatabaseError::conflict(format!(
                    "duplicate key value violates unique constraint \"{table}_pkey\""
                ))),
            };
        }

        let stored = prepare_row(&state.tables, entry, row)?;
        let generated = entry
            .schema
            .columns
            .iter()
            .filter(|c| c.is_sequence_backed() && !row.contains_key(&c.name))
            .count() as i64;
        if let Some(entry) = state.tables.get_mut(table) {
            entry.next_serial += generated;
            entry.rows.push(stored);
        }
        Ok(InsertOutcome::Inserted)
    }

    async fn sync_sequences(&self, table: &str) -> Result<(), DatabaseError> {
        let mut state = self.enter("sync_sequences", table)?;
        let entry = state.tables.get_mut(table).ok_or_else(|| missing(table))?;
        for column in entry.schema.columns.iter().filter(|c| c.is_sequence_backed()) {
            let max = entry
                .rows
                .iter()
                .filter_map(|r| r.get(&column.name).and_then(Value::as_i64))
                .max();
            if let Some(max) = max {
                entry.next_serial = entry.next_serial.max(max + 1);
            }
        }
        Ok(())
    }
}

fn text(row: &Row, column: &str) -> String {
    row.get(column).map(value_to_text).unwrap_or_default()
}

fn count_events(events: &MemoryTable, column: &str, ids: &BTreeSet<&str>) -> u64 {
    events
        .rows
        .iter()
        .filter(|r| ids.contains(text(r, column).as_str()))
        .count() as u64
}

fn merge_group(
    tables: &mut BTreeMap<String, MemoryTable>,
    layout: &ConsolidationTables,
    merge: &GroupMerge,
    undeletable: &BTreeSet<String>,
) -> Result<AppliedMerge, DatabaseError> {
    let targets = tables
        .get(&layout.targets_table)
        .ok_or_else(|| missing(&layout.targets_table))?;
    let canonical_value = targets
        .rows
        .iter()
        .find(|r| text(r, &layout.id_column) == merge.canonical_id)
        .and_then(|r| r.get(&layout.id_column).cloned())
        .ok_or_else(|| DatabaseError::Consistency {
            message: format!("canonical target {} no longer exists", merge.canonical_id),
        })?;

    let mut group: BTreeSet<&str> = merge.duplicate_ids.iter().map(String::as_str).collect();
    group.insert(merge.canonical_id.as_str());
    let duplicates: BTreeSet<&str> = merge.duplicate_ids.iter().map(String::as_str).collect();

    let events = tables
        .get_mut(&layout.events_table)
        .ok_or_else(|| missing(&layout.events_table))?;
    let before = count_events(events, &layout.event_target_column, &group);
    let mut repointed = 0;
    for event in events.rows.iter_mut() {
        if duplicates.contains(text(event, &layout.event_target_column).as_str()) {
            event.insert(layout.event_target_column.clone(), canonical_value.clone());
            repointed += 1;
        }
    }
    let canonical: BTreeSet<&str> = [merge.canonical_id.as_str()].into();
    let after = count_events(events, &layout.event_target_column, &canonical);

    if let Some(id) = merge.duplicate_ids.iter().find(|id| undeletable.contains(*id)) {
        return Err(DatabaseError::Query {
            table: layout.targets_table.clone(),
            message: format!("could not delete target {id}"),
        });
    }
    let targets = tables
        .get_mut(&layout.targets_table)
        .ok_or_else(|| missing(&layout.targets_table))?;
    let remaining = targets.rows.len();
    targets
        .rows
        .retain(|r| !duplicates.contains(text(r, &layout.id_column).as_str()));
    if remaining - targets.rows.len() != duplicates.len() {
        return Err(DatabaseError::Consistency {
            message: format!(
                "group '{}': expected to delete {} targets, deleted {}",
                merge.logical_name,
                duplicates.len(),
                remaining - targets.rows.len()
            ),
        });
    }
    if before != after {
        return Err(DatabaseError::Consistency {
            message: format!(
                "group '{}': {before} clicks before merge, {after} after",
                merge.logical_name
            ),
        });
    }

    Ok(AppliedMerge {
        logical_name: merge.logical_name.clone(),
        canonical_id: merge.canonical_id.clone(),
        removed_ids: merge.duplicate_ids.clone(),
        clicks_repointed: repointed,
        clicks_total: after,
    })
}

#[async_trait]
impl AnalyticsStore for MemoryDatabase {
    async fn load_targets(
        &self,
        tables: &ConsolidationTables,
        target_type: &str,
    ) -> Result<Vec<AnalyticsTarget>, DatabaseError> {
        let state = self.enter("load_targets", &tables.targets_table)?;
        let targets = state
            .tables
            .get(&tables.targets_table)
            .ok_or_else(|| missing(&tables.targets_table))?;
        Ok(targets
            .rows
            .iter()
            .filter(|r| text(r, &tables.type_column) == target_type)
            .filter(|r| r.get(&tables.name_column).is_some_and(|v| !v.is_null()))
            .map(|r| AnalyticsTarget {
                id: text(r, &tables.id_column),
                target_type: text(r, &tables.type_column),
                target_name: text(r, &tables.name_column),
                referenced_entity_id: r
                    .get(&tables.referenced_entity_column)
                    .filter(|v| !v.is_null())
                    .map(value_to_text),
            })
            .collect())
    }

    async fn apply_merges(
        &self,
        tables: &ConsolidationTables,
        merges: &[GroupMerge],
    ) -> Result<Vec<AppliedMerge>, DatabaseError> {
        let mut state = self.enter("apply_merges", &tables.targets_table)?;
        // Work on a copy and swap it in only when every merge succeeded.
        let mut working = state.tables.clone();
        let mut applied = Vec::with_capacity(merges.len());
        for merge in merges {
            applied.push(merge_group(&mut working, tables, merge, &state.undeletable)?);
        }
        state.tables = working;
        Ok(applied)
    }
}

/// Hands out clones of two [`MemoryDatabase`]s and tracks open sessions.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    pub source: MemoryDatabase,
    pub target: MemoryDatabase,
    open: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new(source: MemoryDatabase, target: MemoryDatabase) -> Self {
        Self {
            source,
            target,
            open: Arc::new(AtomicUsize::new(0)),
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sessions connected but not yet released.
    pub fn open_sessions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Sessions connected so far.
    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn checkout(&self, database: &MemoryDatabase) -> MemoryDatabase {
        self.open.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        database.clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Database = MemoryDatabase;

    async fn connect_source(&self) -> anyhow::Result<MemoryDatabase> {
        Ok(self.checkout(&self.source))
    }

    async fn connect_target(&self) -> anyhow::Result<MemoryDatabase> {
        Ok(self.checkout(&self.target))
    }

    async fn release(&self, database: MemoryDatabase) {
        drop(database);
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::{row, users_schema};
    use relay_core::{ColumnDefinition, IdentityKind};
    use serde_json::json;

    #[tokio::test]
    async fn test_primary_key_conflict_follows_policy() {
        let db = MemoryDatabase::new("target").with_table(users_schema());
        let user = row(json!({"id": 1, "email": "a@example.com", "name": "A"}));

        assert_eq!(
            db.insert_row("users", &user, ConflictPolicy::SkipOnConflict)
                .await
                .unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            db.insert_row("users", &user, ConflictPolicy::SkipOnConflict)
                .await
                .unwrap(),
            InsertOutcome::Conflict
        );
        let err = db
            .insert_row("users", &user, ConflictPolicy::FailOnConflict)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(db.row_count("users"), 1);
    }

    #[tokio::test]
    async fn test_not_null_and_unknown_column_rejected() {
        let db = MemoryDatabase::new("target").with_table(users_schema());

        let err = db
            .insert_row("users", &row(json!({"id": 1, "email": null})), ConflictPolicy::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not-null"));

        let err = db
            .insert_row(
                "users",
                &row(json!({"id": 2, "email": "b@example.com", "nickname": "b"})),
                ConflictPolicy::default(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nickname"));
        assert_eq!(db.row_count("users"), 0);
    }

    #[tokio::test]
    async fn test_sequence_generates_and_syncs() {
        let db = MemoryDatabase::new("target").with_table(users_schema());
        db.insert_row(
            "users",
            &row(json!({"id": 40, "email": "x@example.com"})),
            ConflictPolicy::default(),
        )
        .await
        .unwrap();
        assert_eq!(db.next_serial("users"), Some(1));

        db.sync_sequences("users").await.unwrap();
        assert_eq!(db.next_serial("users"), Some(41));

        db.insert_row(
            "users",
            &row(json!({"email": "y@example.com"})),
            ConflictPolicy::default(),
        )
        .await
        .unwrap();
        assert_eq!(db.rows("users")[1]["id"], json!(41));
    }

    #[tokio::test]
    async fn test_identity_and_generated_columns() {
        let schema = TableSchema::new(
            "coupons",
            vec![
                ColumnDefinition::new("id", "integer", false).with_identity(IdentityKind::Always),
                ColumnDefinition::new("price", "numeric", false),
                ColumnDefinition::new("doubled", "numeric", false).with_generated("(price * 2)"),
            ],
        )
        .with_primary_key(&["id"]);
        let db = MemoryDatabase::new("target").with_table(schema);

        db.insert_row("coupons", &row(json!({"id": 7, "price": 5})), ConflictPolicy::default())
            .await
            .unwrap();
        db.sync_sequences("coupons").await.unwrap();
        assert_eq!(db.next_serial("coupons"), Some(8));
    }

    #[tokio::test]
    async fn test_disconnect_is_fatal() {
        let db = MemoryDatabase::new("source").with_table(users_schema());
        db.disconnect();
        let err = db.count_rows("users").await.unwrap_err();
        assert!(err.is_fatal());
    }
}

//! Dependency-ordered importer
//!
//! Replays snapshot artifacts into the target one table at a time, in
//! plan order, one row at a time. Every row gets an explicit outcome:
//! inserted, skipped as a primary-key conflict, or rejected with an error
//! that is recorded and logged before moving on. Only a lost connection
//! ends the import early.
//!
//! Re-running an import under [`ConflictPolicy::SkipOnConflict`] is safe:
//! rows already present are skipped, so the target converges to the
//! snapshot contents.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use relay_core::{
    ConflictPolicy, DatabaseError, ImportOutcome, InsertOutcome, MigrationPlan, RowError,
    RunStatus, TableImportStatus,
};
use serde::Serialize;
use snapshot_store::{ErrorLogEntry, ExportSummary, SnapshotStore};
use tracing::{debug, info, warn};

use crate::database::RelationalStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    pub conflict_policy: ConflictPolicy,
    /// Skip a table when the target already holds at least as many rows as
    /// its snapshot.
    pub skip_populated_tables: bool,
    /// Create a table missing on the target from its saved schema.
    pub create_missing_tables: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::SkipOnConflict,
            skip_populated_tables: true,
            create_missing_tables: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub conflict_policy: ConflictPolicy,
    pub rows_inserted: usize,
    pub rows_skipped: usize,
    pub rows_failed: usize,
    /// Imported tables where some rows were neither inserted nor skipped.
    /// Re-running the import retries them.
    pub partially_imported: Vec<String>,
    pub tables: Vec<ImportOutcome>,
    pub status: RunStatus,
}

impl ImportReport {
    fn new(started_at: DateTime<Utc>, policy: ConflictPolicy, tables: Vec<ImportOutcome>) -> Self {
        let status = RunStatus::from_warnings(tables.iter().any(ImportOutcome::has_warnings));
        let partially_imported = tables
            .iter()
            .filter(|t| t.status == TableImportStatus::Imported && !t.is_complete())
            .map(|t| t.table_name.clone())
            .collect();
        Self {
            started_at,
            finished_at: Utc::now(),
            conflict_policy: policy,
            rows_inserted: tables.iter().map(|t| t.rows_inserted).sum(),
            rows_skipped: tables.iter().map(|t| t.rows_skipped).sum(),
            rows_failed: tables.iter().map(ImportOutcome::rows_failed).sum(),
            partially_imported,
            tables,
            status,
        }
    }

    pub fn table(&self, name: &str) -> Option<&ImportOutcome> {
        self.tables.iter().find(|t| t.table_name == name)
    }

    /// Every rejected row, in import order.
    pub fn error_log(&self) -> Vec<ErrorLogEntry> {
        self.tables
            .iter()
            .flat_map(|outcome| {
                outcome.errors.iter().map(|error| ErrorLogEntry {
                    table: outcome.table_name.clone(),
                    row: error.row.clone(),
                    error_message: error.error_message.clone(),
                })
            })
            .collect()
    }
}

/// Import every table of `plan` and persist the report and error log.
pub async fn import_snapshots<T, A>(
    target: &T,
    store: &A,
    plan: &MigrationPlan,
    options: &ImportOptions,
) -> Result<ImportReport>
where
    T: RelationalStore,
    A: SnapshotStore,
{
    let started_at = Utc::now();
    info!(
        tables = plan.len(),
        policy = %options.conflict_policy,
        "Importing {} into {}",
        store.location(),
        target.label()
    );

    let export_summary = store
        .read_summary()
        .await
        .context("Failed to read export summary")?;

    let mut outcomes = Vec::with_capacity(plan.len());
    for table in plan.tables() {
        let outcome = import_table(target, store, table, options, export_summary.as_ref()).await?;
        outcomes.push(outcome);
    }

    let report = ImportReport::new(started_at, options.conflict_policy, outcomes);
    store
        .write_error_log(&report.error_log())
        .await
        .context("Failed to write import error log")?;
    store
        .write_report("import", &report)
        .await
        .context("Failed to write import report")?;

    info!(
        "Import {}: {} inserted, {} skipped, {} failed",
        report.status, report.rows_inserted, report.rows_skipped, report.rows_failed
    );
    Ok(report)
}

async fn import_table<T, A>(
    target: &T,
    store: &A,
    table: &str,
    options: &ImportOptions,
    export_summary: Option<&ExportSummary>,
) -> Result<ImportOutcome>
where
    T: RelationalStore,
    A: SnapshotStore,
{
    let export_error = export_summary
        .and_then(|summary| summary.table(table))
        .and_then(|entry| entry.error.as_deref());
    if let Some(error) = export_error {
        warn!(table, "Skipping table whose export failed: {error}");
        return Ok(ImportOutcome::new(table, TableImportStatus::SkippedMissingSnapshot));
    }

    let Some(snapshot) = store
        .read_snapshot(table)
        .await
        .with_context(|| format!("Failed to read snapshot of {table}"))?
    else {
        warn!(table, "No snapshot found, skipping");
        return Ok(ImportOutcome::new(table, TableImportStatus::SkippedMissingSnapshot));
    };
    if snapshot.is_empty() {
        info!("Table {table} is empty, skipping");
        return Ok(ImportOutcome::new(table, TableImportStatus::SkippedEmpty));
    }

    if let Some(reason) = prepare_target_table(target, store, table, options).await? {
        warn!(table, "Cannot import table: {reason}");
        return Ok(ImportOutcome::new(table, TableImportStatus::Failed { reason }));
    }

    if options.skip_populated_tables {
        let target_count = match target.count_rows(table).await {
            Ok(count) => count,
            Err(e) => return table_failure(table, e),
        };
        if target_count >= snapshot.len() as u64 {
            info!(
                table,
                target_count,
                snapshot_rows = snapshot.len(),
                "Target already populated, skipping"
            );
            return Ok(ImportOutcome::new(
                table,
                TableImportStatus::SkippedAlreadyPopulated { target_count },
            ));
        }
    }

    let mut outcome = ImportOutcome::new(table, TableImportStatus::Imported);
    for (index, row) in snapshot.rows.into_iter().enumerate() {
        outcome.rows_attempted += 1;
        match target.insert_row(table, &row, options.conflict_policy).await {
            Ok(InsertOutcome::Inserted) => outcome.rows_inserted += 1,
            Ok(InsertOutcome::Conflict) => {
                debug!(table, row = index + 1, "Row already present, skipped");
                outcome.rows_skipped += 1;
            }
            Err(e) if e.is_fatal() => {
                return Err(e).with_context(|| {
                    format!("Import aborted at table {table}, row {}", index + 1)
                });
            }
            Err(e) => {
                warn!(table, row = index + 1, "Row rejected: {e}");
                outcome.errors.push(RowError {
                    conflict: e.is_conflict(),
                    error_message: e.to_string(),
                    row,
                });
            }
        }
    }

    if outcome.rows_inserted > 0 {
        match target.sync_sequences(table).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                return Err(e).with_context(|| format!("Import aborted at table {table}"));
            }
            Err(e) => warn!(table, "Failed to synchronize sequences: {e}"),
        }
    }

    if outcome.is_complete() {
        info!(
            table,
            inserted = outcome.rows_inserted,
            skipped = outcome.rows_skipped,
            "Imported table"
        );
    } else {
        warn!(
            table,
            inserted = outcome.rows_inserted,
            skipped = outcome.rows_skipped,
            failed = outcome.rows_failed(),
            "Table partially imported"
        );
    }
    Ok(outcome)
}

/// Make sure `table` exists on the target.
///
/// Returns a reason when the table cannot be made available.
async fn prepare_target_table<T, A>(
    target: &T,
    store: &A,
    table: &str,
    options: &ImportOptions,
) -> Result<Option<String>>
where
    T: RelationalStore,
    A: SnapshotStore,
{
    match target.table_exists(table).await {
        Ok(true) => return Ok(None),
        Ok(false) => {}
        Err(e) if e.is_fatal() => {
            return Err(e).with_context(|| format!("Import aborted at table {table}"));
        }
        Err(e) => return Ok(Some(e.to_string())),
    }

    if !options.create_missing_tables {
        return Ok(Some(format!("table '{table}' does not exist on the target")));
    }
    let Some(schema) = store
        .read_schema(table)
        .await
        .with_context(|| format!("Failed to read saved schema of {table}"))?
    else {
        return Ok(Some(format!(
            "table '{table}' does not exist on the target and no saved schema is available"
        )));
    };

    match target.create_table(&schema).await {
        Ok(()) => Ok(None),
        Err(e) if e.is_fatal() => {
            Err(e).with_context(|| format!("Import aborted while creating {table}"))
        }
        Err(e) => Ok(Some(format!("failed to create table: {e}"))),
    }
}

fn table_failure(table: &str, error: DatabaseError) -> Result<ImportOutcome> {
    if error.is_fatal() {
        return Err(error).with_context(|| format!("Import aborted at table {table}"));
    }
    warn!(table, "Cannot import table: {error}");
    Ok(ImportOutcome::new(
        table,
        TableImportStatus::Failed {
            reason: error.to_string(),
        },
    ))
}

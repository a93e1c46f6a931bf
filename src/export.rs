//! Snapshot exporter
//!
//! Reads every table of the plan from the source and writes one snapshot
//! artifact per table plus an export summary. A table that cannot be read
//! is recorded in the summary with a zero count and does not stop the
//! remaining tables; only a lost connection aborts the export.

use anyhow::{Context, Result};
use relay_core::{MigrationPlan, RunStatus, TableSnapshot};
use snapshot_store::{ExportSummary, SnapshotStore, TableExportSummary};
use tracing::{info, warn};

use crate::database::RelationalStore;

pub async fn export_snapshots<S, A>(
    source: &S,
    store: &A,
    plan: &MigrationPlan,
) -> Result<ExportSummary>
where
    S: RelationalStore,
    A: SnapshotStore,
{
    info!(
        tables = plan.len(),
        "Exporting {} to {}",
        source.label(),
        store.location()
    );

    let mut per_table = Vec::with_capacity(plan.len());
    for table in plan.tables() {
        match source.fetch_rows(table).await {
            Ok(rows) => {
                let count = rows.len() as u64;
                store
                    .write_snapshot(&TableSnapshot::new(table.as_str(), rows))
                    .await
                    .with_context(|| format!("Failed to write snapshot of {table}"))?;
                info!("Exported {} records from table {}", count, table);
                per_table.push(TableExportSummary {
                    table: table.clone(),
                    count,
                    error: None,
                });
            }
            Err(e) if e.is_fatal() => {
                return Err(e).with_context(|| format!("Export aborted at table {table}"));
            }
            Err(e) => {
                warn!(table = %table, "Export failed: {e}");
                per_table.push(TableExportSummary {
                    table: table.clone(),
                    count: 0,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let summary = ExportSummary::new(per_table);
    store
        .write_summary(&summary)
        .await
        .context("Failed to write export summary")?;

    info!(
        "Export complete: {} records, {} of {} tables failed",
        summary.total_records,
        summary.failed_tables().count(),
        summary.per_table.len()
    );
    Ok(summary)
}

pub fn export_status(summary: &ExportSummary) -> RunStatus {
    RunStatus::from_warnings(summary.failed_tables().next().is_some())
}

//! Reconciliation verifier: per-table row counts on both sides.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use relay_core::{MigrationPlan, RunStatus};
use serde::Serialize;
use tracing::{info, warn};

use crate::database::RelationalStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableReconciliation {
    pub table: String,
    pub source_count: Option<u64>,
    pub target_count: Option<u64>,
    pub matches: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub checked_at: DateTime<Utc>,
    pub tables: Vec<TableReconciliation>,
    pub all_match: bool,
    pub status: RunStatus,
}

impl VerificationReport {
    pub fn mismatches(&self) -> impl Iterator<Item = &TableReconciliation> {
        self.tables.iter().filter(|t| !t.matches)
    }

    pub fn table(&self, name: &str) -> Option<&TableReconciliation> {
        self.tables.iter().find(|t| t.table == name)
    }
}

/// Count every table of `plan` on both sides and compare.
///
/// Mismatches are reported, never repaired. A table whose count fails on
/// either side is reported as a mismatch with the error attached.
pub async fn verify_counts<S, T>(
    source: &S,
    target: &T,
    plan: &MigrationPlan,
) -> Result<VerificationReport>
where
    S: RelationalStore,
    T: RelationalStore,
{
    info!(tables = plan.len(), "Verifying row counts");

    let mut tables = Vec::with_capacity(plan.len());
    for table in plan.tables() {
        let mut errors = Vec::new();
        let source_count = count_or_record(source, table, &mut errors).await?;
        let target_count = count_or_record(target, table, &mut errors).await?;

        let matches = errors.is_empty() && source_count == target_count;
        if matches {
            info!(table = %table, count = source_count.unwrap_or_default(), "Counts match");
        } else {
            warn!(
                table = %table,
                source = ?source_count,
                target = ?target_count,
                "Row counts differ"
            );
        }

        tables.push(TableReconciliation {
            table: table.clone(),
            source_count,
            target_count,
            matches,
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        });
    }

    let all_match = tables.iter().all(|t| t.matches);
    Ok(VerificationReport {
        checked_at: Utc::now(),
        tables,
        all_match,
        status: RunStatus::from_warnings(!all_match),
    })
}

async fn count_or_record<D: RelationalStore>(
    database: &D,
    table: &str,
    errors: &mut Vec<String>,
) -> Result<Option<u64>> {
    match database.count_rows(table).await {
        Ok(count) => Ok(Some(count)),
        Err(e) if e.is_fatal() => {
            Err(e).with_context(|| format!("Verification aborted at table {table}"))
        }
        Err(e) => {
            errors.push(format!("{}: {e}", database.label()));
            Ok(None)
        }
    }
}

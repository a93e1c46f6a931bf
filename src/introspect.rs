//! Schema introspection and migration plan resolution.

use anyhow::{Context, Result};
use relay_core::{MigrationPlan, TableSchema};
use serde::Serialize;
use snapshot_store::SnapshotStore;
use tracing::{info, warn};

use crate::database::RelationalStore;

/// A table the introspector could not describe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableFailure {
    pub table: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntrospectionReport {
    pub plan: MigrationPlan,
    pub schemas: Vec<TableSchema>,
    pub failures: Vec<TableFailure>,
}

/// Describe `requested` tables (or every table when empty) and order them.
///
/// A table that cannot be described is recorded in `failures` and keeps
/// its requested position in the plan; the other tables are unaffected.
pub async fn introspect<S: RelationalStore>(
    source: &S,
    requested: &[String],
) -> Result<IntrospectionReport> {
    let tables = if requested.is_empty() {
        source
            .list_tables()
            .await
            .with_context(|| format!("Failed to list tables on {}", source.label()))?
    } else {
        requested.to_vec()
    };
    info!(tables = tables.len(), "Introspecting {} schema", source.label());

    let mut schemas = Vec::with_capacity(tables.len());
    let mut failures = Vec::new();
    for table in &tables {
        match source.describe_table(table).await {
            Ok(schema) => schemas.push(schema),
            Err(e) if e.is_fatal() => {
                return Err(e).with_context(|| format!("Introspection aborted at table {table}"));
            }
            Err(e) => {
                warn!(table = %table, "Schema lookup failed: {e}");
                failures.push(TableFailure {
                    table: table.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    let plan = MigrationPlan::derive(&tables, &schemas)
        .context("Tables cannot be put in dependency order")?;
    info!("Migration plan: {}", plan.tables().join(" -> "));

    Ok(IntrospectionReport {
        plan,
        schemas,
        failures,
    })
}

/// Persist the plan and every described schema next to the snapshots.
pub async fn save_introspection<A: SnapshotStore>(
    store: &A,
    report: &IntrospectionReport,
) -> Result<()> {
    for schema in &report.schemas {
        store
            .write_schema(schema)
            .await
            .with_context(|| format!("Failed to store schema of {}", schema.name))?;
    }
    store
        .write_plan(&report.plan)
        .await
        .context("Failed to store migration plan")?;
    Ok(())
}

/// Tables to introspect when exporting: `requested` if given, otherwise the
/// tables of a saved plan. Empty means every table of the source schema.
pub async fn tables_to_export<A: SnapshotStore>(
    store: &A,
    requested: &[String],
) -> Result<Vec<String>> {
    if !requested.is_empty() {
        return Ok(requested.to_vec());
    }
    let saved = store
        .read_plan()
        .await
        .context("Failed to read saved migration plan")?;
    Ok(saved.map(|plan| plan.tables().to_vec()).unwrap_or_default())
}

/// Resolve the plan for steps that run without a source connection.
///
/// Uses the saved `migration-plan.json`, narrowed to `requested` if given.
/// Without a saved plan, `requested` is ordered using saved schemas.
pub async fn load_plan<A: SnapshotStore>(store: &A, requested: &[String]) -> Result<MigrationPlan> {
    let saved = store
        .read_plan()
        .await
        .context("Failed to read saved migration plan")?;

    let plan = match saved {
        Some(plan) if requested.is_empty() => plan,
        Some(plan) => plan.subset(requested)?,
        None if requested.is_empty() => anyhow::bail!(
            "No migration plan found in {}; run the export first or pass --tables",
            store.location()
        ),
        None => {
            let schemas = saved_schemas(store, requested).await?;
            MigrationPlan::derive(requested, &schemas)?
        }
    };

    let schemas = saved_schemas(store, plan.tables()).await?;
    plan.validate(&schemas)
        .context("Saved migration plan contradicts saved schemas")?;
    Ok(plan)
}

async fn saved_schemas<A: SnapshotStore>(store: &A, tables: &[String]) -> Result<Vec<TableSchema>> {
    let mut schemas = Vec::new();
    for table in tables {
        if let Some(schema) = store
            .read_schema(table)
            .await
            .with_context(|| format!("Failed to read saved schema of {table}"))?
        {
            schemas.push(schema);
        }
    }
    Ok(schemas)
}
